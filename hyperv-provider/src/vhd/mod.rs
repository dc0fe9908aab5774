//! Virtual disk operations expressed as `khyperv-csi` cmdlets.
//!
//! Every function takes the shared [`Runner`] and returns typed results.
//! Disk names and ids are validated before they are interpolated into a
//! command line.

mod error;

use std::sync::LazyLock;

use hyperv_api::models::{
    AttachedDrive, CapacityInfo, GetVmResponse, ListVhdResponse, ListVmResponse, PvStoreInfo,
    VhdInfo,
};
use hyperv_api::{ApiError, VHD_TYPE};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::powershell::{Cmdlet, Runner, Shell, decode_list, decode_one};

pub use error::{Result, VhdError};

static DISK_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z0-9._-]+);([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\.vhdx?$",
    )
    .expect("Invalid regex pattern")
});

/// Split a disk file path into `(name, id)`.
///
/// Disk files are named `<name>;<guid>.vhdx`.
pub fn parse_disk_path(path: &str) -> Result<(String, String)> {
    // Backend paths use Windows separators.
    let file_name = path
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(path);

    DISK_NAME_RE
        .captures(file_name)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .ok_or_else(|| VhdError::InvalidDiskPath(path.to_string()))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(VhdError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| VhdError::InvalidDiskId(id.to_string()))
}

/// Page tokens are the decimal offsets handed out by `Get-PVDisks`.
fn validate_token(token: &str) -> Result<()> {
    if !token.chars().all(|c| c.is_ascii_digit()) {
        return Err(VhdError::InvalidToken(token.to_string()));
    }
    Ok(())
}

fn found(vhd: VhdInfo, what: &str) -> Result<VhdInfo> {
    if vhd.is_empty() {
        return Err(ApiError::not_found(format!("disk {} not found", what)).into());
    }
    Ok(vhd)
}

async fn query<S: Shell, T>(runner: &Runner<S>, cmdlet: Cmdlet) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let stdout = runner.run_with_result(&[cmdlet]).await?;
    Ok(decode_one(&stdout)?)
}

/// The sequence held in `field` of a listing. `ConvertTo-Json` renders a
/// one-element array property as a bare object.
fn sequence_field<T: DeserializeOwned>(listing: &Value, field: &str) -> Result<Vec<T>> {
    match listing.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(items) => Ok(decode_list(&items.to_string())?),
    }
}

/// Create a new disk in `store`.
#[instrument(skip(runner))]
pub async fn new<S: Shell>(runner: &Runner<S>, name: &str, store: &str, size: i64) -> Result<VhdInfo> {
    validate_name(name)?;
    let vhd: VhdInfo = query(
        runner,
        Cmdlet::new("New-PVDisk")
            .arg("Name", name)
            .arg("PVStore", store)
            .arg("Size", size)
            .arg("VHDType", VHD_TYPE),
    )
    .await?;
    found(vhd, name)
}

pub async fn get_by_name<S: Shell>(runner: &Runner<S>, store: &str, name: &str) -> Result<VhdInfo> {
    validate_name(name)?;
    let vhd = query(
        runner,
        Cmdlet::new("Get-PVDisk")
            .arg("PVStore", store)
            .arg("Name", name)
            .switch("AsJson"),
    )
    .await?;
    found(vhd, name)
}

pub async fn get_by_id<S: Shell>(runner: &Runner<S>, store: &str, id: &str) -> Result<VhdInfo> {
    validate_id(id)?;
    let vhd = query(
        runner,
        Cmdlet::new("Get-PVDisk")
            .arg("PVStore", store)
            .arg("Id", id)
            .switch("AsJson"),
    )
    .await?;
    found(vhd, id)
}

pub async fn get_by_path<S: Shell>(runner: &Runner<S>, path: &str) -> Result<VhdInfo> {
    parse_disk_path(path)?;
    let vhd = query(
        runner,
        Cmdlet::new("Get-PVDisk")
            .arg("PVStore", "")
            .arg("Path", path)
            .switch("AsJson"),
    )
    .await?;
    found(vhd, path)
}

/// One page of disks. An empty token starts from the beginning.
pub async fn list<S: Shell>(
    runner: &Runner<S>,
    store: &str,
    max_entries: i32,
    next_token: &str,
) -> Result<ListVhdResponse> {
    validate_token(next_token)?;
    let listing: Value = query(
        runner,
        Cmdlet::new("Get-PVDisks")
            .arg("PVStore", store)
            .arg("MaxEntries", max_entries)
            .arg("NextToken", next_token),
    )
    .await?;
    Ok(ListVhdResponse {
        vhds: sequence_field(&listing, "VHDs")?,
        next_token: listing
            .get("NextToken")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[instrument(skip(runner))]
pub async fn delete<S: Shell>(runner: &Runner<S>, store: &str, id: &str) -> Result<()> {
    validate_id(id)?;
    runner
        .run(&[Cmdlet::new("Remove-PVDisk").arg("PVStore", store).arg("Id", id)])
        .await?;
    Ok(())
}

/// Grow a disk. The module never shrinks, so the result may be larger
/// than `size`.
#[instrument(skip(runner))]
pub async fn resize<S: Shell>(runner: &Runner<S>, store: &str, id: &str, size: i64) -> Result<VhdInfo> {
    validate_id(id)?;
    let vhd = query(
        runner,
        Cmdlet::new("Resize-PVDisk")
            .arg("Id", id)
            .arg("PVStore", store)
            .arg("Size", size),
    )
    .await?;
    found(vhd, id)
}

/// Attach a disk to a VM's SCSI controller.
#[instrument(skip(runner))]
pub async fn attach<S: Shell>(
    runner: &Runner<S>,
    store: &str,
    id: &str,
    vm_id: &str,
) -> Result<AttachedDrive> {
    let disk = get_by_id(runner, store, id).await?;
    validate_id(vm_id)?;
    query(
        runner,
        Cmdlet::new("Mount-PVDisk")
            .arg("VMId", vm_id)
            .arg("DiskPath", disk.path.as_str()),
    )
    .await
}

#[instrument(skip(runner))]
pub async fn detach<S: Shell>(runner: &Runner<S>, store: &str, id: &str, vm_id: &str) -> Result<()> {
    let disk = get_by_id(runner, store, id).await?;
    validate_id(vm_id)?;
    runner
        .run(&[Cmdlet::new("Dismount-PVDisk")
            .arg("VMId", vm_id)
            .arg("DiskPath", disk.path.as_str())])
        .await?;
    Ok(())
}

/// Free bytes in the store.
pub async fn capacity<S: Shell>(runner: &Runner<S>, store: &str) -> Result<i64> {
    let info: CapacityInfo = query(runner, Cmdlet::new("Get-PVCapacity").arg("PVStore", store)).await?;
    Ok(info.free_space_bytes)
}

/// The store directory the module selects when none is configured.
pub async fn store_path<S: Shell>(runner: &Runner<S>) -> Result<String> {
    let info: PvStoreInfo = query(runner, Cmdlet::new("Get-PVStore")).await?;
    if info.pv_store.is_empty() {
        return Err(ApiError::internal("no PV store directory available").into());
    }
    Ok(info.pv_store)
}

pub async fn list_vms<S: Shell>(runner: &Runner<S>) -> Result<ListVmResponse> {
    let listing: Value = query(runner, Cmdlet::new("Get-PVVirtualMachines")).await?;
    Ok(ListVmResponse {
        vms: sequence_field(&listing, "VMs")?,
    })
}

/// Look a VM up by id, ignoring case.
pub async fn get_vm<S: Shell>(runner: &Runner<S>, id: &str) -> Result<GetVmResponse> {
    let vms = list_vms(runner).await?;
    debug!(count = vms.vms.len(), "Listed virtual machines");
    vms.vms
        .into_iter()
        .find(|vm| vm.id.eq_ignore_ascii_case(id))
        .ok_or_else(|| ApiError::not_found(format!("VM {} not found", id)).into())
}
