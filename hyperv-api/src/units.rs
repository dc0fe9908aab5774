//! Size constants and human-readable byte formatting.

pub const KIB: i64 = 1024;
pub const MIB: i64 = KIB * 1024;
pub const GIB: i64 = MIB * 1024;
pub const TIB: i64 = GIB * 1024;

/// Smallest volume the backend will create.
pub const MINIMUM_VOLUME_SIZE: i64 = 5 * MIB;
/// Largest volume the backend will create.
pub const MAXIMUM_VOLUME_SIZE: i64 = 2 * TIB;
/// Size used when a request carries no capacity range.
pub const DEFAULT_VOLUME_SIZE: i64 = 16 * GIB;

const UNITS: [(i64, &str); 4] = [(TIB, "Ti"), (GIB, "Gi"), (MIB, "Mi"), (KIB, "Ki")];

/// Format a byte count using the largest binary unit not exceeding it,
/// e.g. `5Mi` or `1.5Gi`.
pub fn format_bytes(n: i64) -> String {
    let abs = n.unsigned_abs() as i64;
    for (unit, suffix) in UNITS {
        if abs >= unit {
            let value = format!("{:.1}", n as f64 / unit as f64);
            let value = value.strip_suffix(".0").unwrap_or(&value);
            return format!("{value}{suffix}");
        }
    }
    n.to_string()
}
