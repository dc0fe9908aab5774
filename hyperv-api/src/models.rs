//! REST bodies and the JSON documents emitted by the PowerShell module.
//!
//! Field names follow the producer: PowerShell objects serialize in
//! PascalCase, REST-native bodies in lower/snake case.

use serde::{Deserialize, Serialize};

/// A virtual disk as reported by `Get-PVDisk` / `New-PVDisk`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhdInfo {
    /// Backend-local path of the disk file.
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Size in bytes.
    #[serde(rename = "Size", default)]
    pub size: i64,
    /// GUID identifying the disk; used as the CSI volume id.
    #[serde(rename = "DiskIdentifier", default)]
    pub disk_identifier: String,
    /// VM the disk is attached to, if any.
    #[serde(rename = "Host", default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl VhdInfo {
    /// Whether the shell returned an actual disk rather than an empty document.
    pub fn is_empty(&self) -> bool {
        self.disk_identifier.is_empty() && self.path.is_empty()
    }
}

/// Page of disks as produced by `Get-PVDisks`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVhdResponse {
    #[serde(rename = "VHDs", default)]
    pub vhds: Vec<VhdInfo>,
    #[serde(rename = "NextToken", default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Page of volumes as served on `GET /volumes`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesResponse {
    #[serde(default)]
    pub volumes: Vec<VhdInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl From<ListVhdResponse> for ListVolumesResponse {
    fn from(page: ListVhdResponse) -> Self {
        Self {
            volumes: page.vhds,
            next_token: page.next_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Volume summary returned by create and get.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVolumeResponse {
    pub name: String,
    pub id: String,
    pub size: i64,
}

impl From<&VhdInfo> for GetVolumeResponse {
    fn from(vhd: &VhdInfo) -> Self {
        Self {
            name: vhd.name.clone(),
            id: vhd.disk_identifier.clone(),
            size: vhd.size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetCapacityResponse {
    pub available_capacity: i64,
    pub minimum_volume_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpandVolumeResponse {
    pub capacity_bytes: i64,
    pub node_expansion_required: bool,
}

/// A Hyper-V virtual machine (a Kubernetes node).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetVmResponse {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "Generation", default)]
    pub generation: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVmResponse {
    #[serde(rename = "VMs", default)]
    pub vms: Vec<GetVmResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthyResponse {
    pub status: String,
}

impl HealthyResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// `Get-PVCapacity` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapacityInfo {
    #[serde(rename = "FreeSpaceBytes", default)]
    pub free_space_bytes: i64,
}

/// `Get-PVStore` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PvStoreInfo {
    #[serde(rename = "PVStore", default)]
    pub pv_store: String,
}

/// Drive description returned by `Mount-PVDisk`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AttachedDrive {
    pub path: String,
    pub disk_number: Option<i32>,
    #[serde(rename = "MaximumIOPS")]
    pub maximum_iops: i64,
    #[serde(rename = "MinimumIOPS")]
    pub minimum_iops: i64,
    #[serde(rename = "QoSPolicyID")]
    pub qos_policy_id: String,
    pub support_persistent_reservations: bool,
    pub write_hardening_method: i32,
    pub controller_location: i32,
    pub controller_number: i32,
    pub controller_type: i32,
    pub name: String,
    pub pool_name: String,
    pub id: String,
    #[serde(rename = "VMId")]
    pub vm_id: String,
    #[serde(rename = "VMName")]
    pub vm_name: String,
    pub computer_name: String,
    pub is_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vhd_info_uses_pascal_case() {
        let vhd: VhdInfo = serde_json::from_str(
            r#"{"Path":"C:\\pv\\data;53b8f8d8-38b2-4479-8ca5-842c2cd44861.vhdx","Name":"data","Size":16777216,"DiskIdentifier":"53b8f8d8-38b2-4479-8ca5-842c2cd44861"}"#,
        )
        .unwrap();
        assert_eq!(vhd.name, "data");
        assert_eq!(vhd.size, 16 * 1024 * 1024);
        assert!(vhd.host.is_none());
        assert!(!vhd.is_empty());

        let json = serde_json::to_value(&vhd).unwrap();
        assert!(json.get("Host").is_none());
        assert_eq!(json["DiskIdentifier"], "53b8f8d8-38b2-4479-8ca5-842c2cd44861");
    }

    #[test]
    fn test_list_vhd_converts_to_wire_page() {
        let page = ListVhdResponse {
            vhds: vec![VhdInfo::default()],
            next_token: Some(String::new()),
        };
        let wire = ListVolumesResponse::from(page);
        assert_eq!(wire.volumes.len(), 1);
        assert!(wire.next_token.is_none());

        let json = serde_json::to_value(&wire).unwrap();
        assert!(json.get("next_token").is_none());
        assert!(json["volumes"].is_array());
    }

    #[test]
    fn test_capacity_and_expand_field_names() {
        let cap = GetCapacityResponse {
            available_capacity: 10,
            minimum_volume_size: 5,
        };
        let json = serde_json::to_value(&cap).unwrap();
        assert_eq!(json["AvailableCapacity"], 10);
        assert_eq!(json["MinimumVolumeSize"], 5);

        let expand: ExpandVolumeResponse =
            serde_json::from_str(r#"{"CapacityBytes":42,"NodeExpansionRequired":true}"#).unwrap();
        assert_eq!(expand.capacity_bytes, 42);
        assert!(expand.node_expansion_required);
    }

    #[test]
    fn test_attached_drive_tolerates_partial_documents() {
        let drive: AttachedDrive = serde_json::from_str(
            r#"{"Path":"C:\\pv\\a.vhdx","VMId":"abc","ControllerLocation":3,"DiskNumber":null}"#,
        )
        .unwrap();
        assert_eq!(drive.vm_id, "abc");
        assert_eq!(drive.controller_location, 3);
        assert!(drive.disk_number.is_none());
    }
}
