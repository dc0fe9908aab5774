//! Maps a volume GUID to the `/dev/disk/by-id` link the guest kernel creates
//! for the synthetic SCSI disk Hyper-V attached.
//!
//! The link name is `scsi-3<wwn>`, where the 16-byte WWN is built as:
//!
//! | bytes   | content                                      |
//! |---------|----------------------------------------------|
//! | 0..4    | `60 02 24 80` (NAA type 6 + Microsoft OUI)   |
//! | 4..8    | GUID Data1, little-endian                    |
//! | 8..10   | GUID Data2, little-endian                    |
//! | 10..16  | last 6 bytes of GUID Data4                   |

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Directory holding the persistent device links.
pub const DISK_BY_ID_DIR: &str = "/dev/disk/by-id";

const WWN_PREFIX: [u8; 4] = [0x60, 0x02, 0x24, 0x80];
const WWN_LENGTH: usize = 16;

#[derive(Error, Debug)]
pub enum DiskIdError {
    #[error("invalid volume ID {id:?}: {source}")]
    InvalidGuid {
        id: String,
        #[source]
        source: uuid::Error,
    },
}

pub type Result<T> = std::result::Result<T, DiskIdError>;

/// The `scsi-3<wwn>` link name for `guid`.
pub fn link_name(guid: &str) -> Result<String> {
    let uuid = Uuid::parse_str(guid).map_err(|source| DiskIdError::InvalidGuid {
        id: guid.to_string(),
        source,
    })?;

    // RFC 4122 byte order; Hyper-V stores the first three fields little-endian
    let mut bytes = *uuid.as_bytes();
    bytes[0..4].reverse();
    bytes[4..6].reverse();
    bytes[6..8].reverse();

    let mut wwn = Vec::with_capacity(WWN_LENGTH);
    wwn.extend_from_slice(&WWN_PREFIX);
    wwn.extend_from_slice(&bytes[0..6]);
    wwn.extend_from_slice(&bytes[10..16]);

    Ok(format!("scsi-3{}", hex::encode(wwn)))
}

/// Full path of the device link for `guid`.
pub fn device_path(guid: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(DISK_BY_ID_DIR).join(link_name(guid)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_disks() {
        assert_eq!(
            link_name("53B8F8D8-38B2-4479-8CA5-842C2CD44861").unwrap(),
            "scsi-360022480d8f8b853b238842c2cd44861"
        );
        assert_eq!(
            link_name("F37E8C32-8063-4027-974F-43B258C5F9E2").unwrap(),
            "scsi-360022480328c7ef3638043b258c5f9e2"
        );
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            link_name("53b8f8d8-38b2-4479-8ca5-842c2cd44861").unwrap(),
            link_name("53B8F8D8-38B2-4479-8CA5-842C2CD44861").unwrap()
        );
    }

    #[test]
    fn test_distinct_guids_do_not_collide() {
        let a = link_name("00000000-0000-0000-0000-000000000001").unwrap();
        let b = link_name("00000000-0000-0000-0000-000000000002").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), "scsi-3".len() + 2 * WWN_LENGTH);
    }

    #[test]
    fn test_device_path() {
        let path = device_path("F37E8C32-8063-4027-974F-43B258C5F9E2").unwrap();
        assert_eq!(
            path,
            PathBuf::from("/dev/disk/by-id/scsi-360022480328c7ef3638043b258c5f9e2")
        );
    }

    #[test]
    fn test_invalid_guid() {
        let err = link_name("not-a-guid").unwrap_err();
        assert!(err.to_string().contains("not-a-guid"));
    }
}
