//! Reader for the Hyper-V key/value exchange pools.
//!
//! The `hv_kvp_daemon` mirrors the host's KVP data into
//! `/var/lib/hyperv/.kvp_pool_<N>`. Each pool is a sequence of fixed-size
//! records: a NUL-padded 512-byte key followed by a NUL-padded 2048-byte value.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// Directory the KVP daemon writes its pools to.
pub const KVP_DIR: &str = "/var/lib/hyperv";

pub const VM_NAME_KEY: &str = "VirtualMachineName";
pub const VM_ID_KEY: &str = "VirtualMachineId";

const KEY_SIZE: usize = 512;
const VALUE_SIZE: usize = 2048;
const RECORD_SIZE: usize = KEY_SIZE + VALUE_SIZE;

#[derive(Error, Debug)]
pub enum KvpError {
    #[error("hyper-v kvp metadata service is not present at {0}")]
    NotPresent(PathBuf),

    #[error("error reading pool file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("key {0:?} not found in any pool")]
    KeyNotFound(String),

    #[error("multiple values found for key {0:?} in different pools")]
    AmbiguousKey(String),
}

pub type Result<T> = std::result::Result<T, KvpError>;

/// Looks up keys across the KVP pools in one directory.
#[derive(Debug, Clone)]
pub struct KvpReader {
    dir: PathBuf,
}

impl Default for KvpReader {
    fn default() -> Self {
        Self::new(KVP_DIR)
    }
}

impl KvpReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn is_present(&self) -> bool {
        self.dir.is_dir()
    }

    /// Pool files `.kvp_pool_0`, `.kvp_pool_1`, ... up to the first gap.
    pub fn pools(&self) -> Vec<PathBuf> {
        (0..)
            .map(|n| self.dir.join(format!(".kvp_pool_{}", n)))
            .take_while(|p| p.exists())
            .collect()
    }

    /// The value of `key`, which must be present in exactly one pool.
    pub fn find(&self, key: &str) -> Result<String> {
        if !self.is_present() {
            return Err(KvpError::NotPresent(self.dir.clone()));
        }

        let mut found = Vec::with_capacity(1);
        for pool in self.pools() {
            match read_pool(&pool, key) {
                Ok(Some(value)) => {
                    debug!(pool = %pool.display(), key = %key, "KVP key found");
                    found.push(value);
                }
                Ok(None) => {}
                Err(e) => warn!(pool = %pool.display(), error = %e, "Skipping unreadable KVP pool"),
            }
        }

        match found.len() {
            0 => Err(KvpError::KeyNotFound(key.to_string())),
            1 => Ok(found.remove(0)),
            _ => Err(KvpError::AmbiguousKey(key.to_string())),
        }
    }
}

/// Scan one pool file for `key`.
pub fn read_pool(path: &Path, key: &str) -> Result<Option<String>> {
    let data = std::fs::read(path).map_err(|source| KvpError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    for record in data.chunks_exact(RECORD_SIZE) {
        if record.iter().all(|b| *b == 0) {
            continue;
        }
        let (raw_key, raw_value) = record.split_at(KEY_SIZE);
        let record_key = decode_c_string(raw_key);
        if !record_key.is_empty() && record_key == key {
            return Ok(Some(decode_c_string(raw_value)));
        }
    }

    Ok(None)
}

fn decode_c_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn record(key: &str, value: &str) -> Vec<u8> {
        let mut rec = vec![0u8; RECORD_SIZE];
        rec[..key.len()].copy_from_slice(key.as_bytes());
        rec[KEY_SIZE..KEY_SIZE + value.len()].copy_from_slice(value.as_bytes());
        rec
    }

    fn write_pool(dir: &Path, n: usize, records: &[Vec<u8>]) {
        fs::write(dir.join(format!(".kvp_pool_{}", n)), records.concat()).unwrap();
    }

    #[test]
    fn test_read_pool_skips_empty_records() {
        let tmp = TempDir::new().unwrap();
        write_pool(
            tmp.path(),
            0,
            &[
                vec![0u8; RECORD_SIZE],
                record("HostName", "hv01"),
                record(VM_ID_KEY, "F37E8C32-8063-4027-974F-43B258C5F9E2"),
            ],
        );

        let pool = tmp.path().join(".kvp_pool_0");
        assert_eq!(
            read_pool(&pool, VM_ID_KEY).unwrap().as_deref(),
            Some("F37E8C32-8063-4027-974F-43B258C5F9E2")
        );
        assert_eq!(read_pool(&pool, "Missing").unwrap(), None);
    }

    #[test]
    fn test_pools_stop_at_first_gap() {
        let tmp = TempDir::new().unwrap();
        write_pool(tmp.path(), 0, &[]);
        write_pool(tmp.path(), 1, &[]);
        write_pool(tmp.path(), 3, &[]);

        let reader = KvpReader::new(tmp.path());
        assert_eq!(reader.pools().len(), 2);
    }

    #[test]
    fn test_find_in_exactly_one_pool() {
        let tmp = TempDir::new().unwrap();
        write_pool(tmp.path(), 0, &[record("Other", "x")]);
        write_pool(tmp.path(), 1, &[]);
        write_pool(tmp.path(), 2, &[]);
        write_pool(tmp.path(), 3, &[record(VM_NAME_KEY, "worker-1")]);

        let reader = KvpReader::new(tmp.path());
        assert_eq!(reader.find(VM_NAME_KEY).unwrap(), "worker-1");
    }

    #[test]
    fn test_find_skips_unreadable_pool() {
        let tmp = TempDir::new().unwrap();
        write_pool(tmp.path(), 0, &[record("Other", "x")]);
        fs::create_dir(tmp.path().join(".kvp_pool_1")).unwrap();
        write_pool(tmp.path(), 2, &[record(VM_ID_KEY, "abc")]);

        let reader = KvpReader::new(tmp.path());
        assert_eq!(reader.pools().len(), 3);
        assert!(matches!(
            read_pool(&tmp.path().join(".kvp_pool_1"), VM_ID_KEY),
            Err(KvpError::Io { .. })
        ));
        assert_eq!(reader.find(VM_ID_KEY).unwrap(), "abc");
        assert!(matches!(
            reader.find(VM_NAME_KEY).unwrap_err(),
            KvpError::KeyNotFound(_)
        ));
    }

    #[test]
    fn test_find_missing_key() {
        let tmp = TempDir::new().unwrap();
        write_pool(tmp.path(), 0, &[record("Other", "x")]);

        let err = KvpReader::new(tmp.path()).find(VM_ID_KEY).unwrap_err();
        assert!(matches!(err, KvpError::KeyNotFound(_)));
    }

    #[test]
    fn test_find_ambiguous_key() {
        let tmp = TempDir::new().unwrap();
        write_pool(tmp.path(), 0, &[record(VM_ID_KEY, "a")]);
        write_pool(tmp.path(), 1, &[record(VM_ID_KEY, "b")]);

        let err = KvpReader::new(tmp.path()).find(VM_ID_KEY).unwrap_err();
        assert!(matches!(err, KvpError::AmbiguousKey(_)));
    }

    #[test]
    fn test_not_present() {
        let tmp = TempDir::new().unwrap();
        let reader = KvpReader::new(tmp.path().join("missing"));
        assert!(!reader.is_present());
        assert!(matches!(
            reader.find(VM_ID_KEY).unwrap_err(),
            KvpError::NotPresent(_)
        ));
    }
}
