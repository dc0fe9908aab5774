//! JSON decoding of shell output.

use serde::de::DeserializeOwned;

use super::error::Result;

/// Decode a single document. Empty output yields `T::default()`.
pub fn decode_one<T: DeserializeOwned + Default>(stdout: &str) -> Result<T> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(stdout)?)
}

/// Decode a sequence. PowerShell emits a bare object when there is exactly
/// one result, so such output is wrapped into a one-element array.
pub fn decode_list<T: DeserializeOwned>(stdout: &str) -> Result<Vec<T>> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Vec::new());
    }
    if stdout.starts_with('{') {
        return Ok(serde_json::from_str(&format!("[{}]", stdout))?);
    }
    Ok(serde_json::from_str(stdout)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyperv_api::models::{GetVmResponse, VhdInfo};

    #[test]
    fn test_decode_one_empty_is_default() {
        let vhd: VhdInfo = decode_one("  ").unwrap();
        assert!(vhd.is_empty());
    }

    #[test]
    fn test_decode_list_wraps_single_object() {
        let vms: Vec<GetVmResponse> =
            decode_list(r#"{"Name":"node-1","Id":"abc","Path":"C:\\vm","Generation":2}"#).unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].name, "node-1");

        let vms: Vec<GetVmResponse> =
            decode_list(r#"[{"Name":"a","Id":"1"},{"Name":"b","Id":"2"}]"#).unwrap();
        assert_eq!(vms.len(), 2);

        let vms: Vec<GetVmResponse> = decode_list("").unwrap();
        assert!(vms.is_empty());
    }

    #[test]
    fn test_decode_error() {
        assert!(decode_one::<VhdInfo>("not json").is_err());
    }
}
