//! Linux implementations of the node's disk and mount operations.
//!
//! Everything here shells out to the standard util-linux / e2fsprogs /
//! xfsprogs tools, except usage statistics which come from `statfs(2)`.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::process::Command;

use nix::sys::statfs::statfs;
use tonic::Status;
use tracing::{debug, error, info, warn};

use super::{Mounter, PlatformResult, VolumeStatistics};

/// Filesystem used when the volume capability does not name one.
pub const DEFAULT_FS_TYPE: &str = "ext4";

const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const RUNNING_STATE: &str = "running";

/// Run `program` and return its stdout, mapping spawn failures and non-zero
/// exits to `Internal`.
fn run_command(program: &str, args: &[&str]) -> PlatformResult<String> {
    debug!(program = %program, args = ?args, "Running command");

    let output = Command::new(program).args(args).output().map_err(|e| {
        error!(error = %e, program = %program, "Failed to execute command");
        Status::internal(format!("Failed to execute {}: {}", program, e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(stderr = %stderr, program = %program, "Command failed");
        return Err(Status::internal(format!(
            "{} failed: {}",
            program,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Create a filesystem on `device`.
pub fn format_device(device: &str, fs_type: &str) -> PlatformResult<()> {
    info!(device = %device, fs_type = %fs_type, "Formatting device");

    match fs_type.to_lowercase().as_str() {
        // -F / -f: don't prompt on an existing signature
        "ext4" => run_command("mkfs.ext4", &["-F", device])?,
        "xfs" => run_command("mkfs.xfs", &["-f", device])?,
        _ => {
            return Err(Status::invalid_argument(format!(
                "Unsupported filesystem type on Linux: {}. Supported: ext4, xfs",
                fs_type
            )));
        }
    };

    Ok(())
}

/// True when `device` has no recognizable filesystem signature.
pub fn needs_formatting(device: &str) -> PlatformResult<bool> {
    let output = Command::new("blkid")
        .args(["-p", device])
        .output()
        .map_err(|e| {
            error!(error = %e, "Failed to execute blkid");
            Status::internal(format!("Failed to check device filesystem: {}", e))
        })?;

    // blkid exits non-zero when it finds nothing
    if !output.status.success() {
        return Ok(true);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(!stdout.contains("TYPE="))
}

/// Mount `source` on `target`, creating the mount point first.
pub fn mount_device(
    source: &str,
    target: &str,
    fs_type: Option<&str>,
    options: &[String],
) -> PlatformResult<()> {
    info!(
        source = %source,
        target = %target,
        fs_type = ?fs_type,
        options = ?options,
        "Mounting"
    );

    let bind = options.iter().any(|o| o == "bind");
    if bind && is_block_device(source)? {
        create_file_mount_point(target)?;
    } else {
        fs::create_dir_all(target).map_err(|e| {
            error!(error = %e, "Failed to create mount target directory");
            Status::internal(format!("Failed to create mount directory: {}", e))
        })?;
    }

    let mut args: Vec<&str> = Vec::new();
    if let Some(fs_type) = fs_type.filter(|f| !f.is_empty()) {
        args.extend(["-t", fs_type]);
    }
    let joined = options.join(",");
    if !joined.is_empty() {
        args.extend(["-o", joined.as_str()]);
    }
    args.extend([source, target]);

    run_command("mount", &args)?;
    Ok(())
}

/// Bind-mounting a device needs a regular file as the mount point.
fn create_file_mount_point(target: &str) -> PlatformResult<()> {
    if let Some(parent) = Path::new(target).parent() {
        fs::create_dir_all(parent).map_err(|e| {
            error!(error = %e, "Failed to create mount target parent directory");
            Status::internal(format!("Failed to create mount directory: {}", e))
        })?;
    }

    fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(target)
        .map_err(|e| {
            error!(error = %e, "Failed to create mount target file");
            Status::internal(format!("Failed to create mount target file: {}", e))
        })?;
    Ok(())
}

/// Unmount `target`, treating "not mounted" as success.
pub fn unmount(target: &str) -> PlatformResult<()> {
    info!(target = %target, "Unmounting");

    if !is_mounted(target)? {
        debug!(target = %target, "Path is not mounted, skipping unmount");
        return Ok(());
    }

    let output = Command::new("umount").arg(target).output().map_err(|e| {
        error!(error = %e, "Failed to execute umount");
        Status::internal(format!("Failed to execute umount: {}", e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not mounted") || stderr.contains("no mount point") {
            warn!(target = %target, "Path was not mounted");
            return Ok(());
        }
        error!(stderr = %stderr, "umount failed");
        return Err(Status::internal(format!("umount failed: {}", stderr)));
    }

    Ok(())
}

pub fn is_mounted(target: &str) -> PlatformResult<bool> {
    if let Ok(mounts) = fs::read_to_string("/proc/mounts") {
        return Ok(mounts
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(target)));
    }

    // Fallback to mount command
    let stdout = run_command("mount", &[])?;
    Ok(stdout
        .lines()
        .any(|line| line.split_whitespace().nth(2) == Some(target)))
}

/// Fails unless the SCSI device behind the `source` link is in the
/// `running` state.
pub fn is_attached(source: &str) -> PlatformResult<()> {
    check_device_state(source, Path::new(SYS_CLASS_BLOCK))
}

fn check_device_state(source: &str, sys_class_block: &Path) -> PlatformResult<()> {
    let resolved = fs::canonicalize(source).map_err(|e| {
        Status::internal(format!(
            "error evaluating the symbolic link {:?}: {}",
            source, e
        ))
    })?;

    let device = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if device.is_empty() {
        return Err(Status::internal(format!(
            "error device name is empty for path {}",
            resolved.display()
        )));
    }

    let state_file = sys_class_block.join(&device).join("device").join("state");
    let state = fs::read_to_string(&state_file).map_err(|e| {
        Status::internal(format!(
            "error reading the device state file {:?}: {}",
            state_file.display().to_string(),
            e
        ))
    })?;

    let state = state.trim();
    if state != RUNNING_STATE {
        return Err(Status::internal(format!(
            "error comparing the state file content, expected: {}, got: {}",
            RUNNING_STATE, state
        )));
    }

    Ok(())
}

pub fn is_block_device(path: &str) -> PlatformResult<bool> {
    let metadata = fs::metadata(path).map_err(|e| {
        Status::internal(format!("Failed to stat {}: {}", path, e))
    })?;
    Ok(metadata.file_type().is_block_device())
}

pub fn device_size(source: &str) -> PlatformResult<i64> {
    let stdout = run_command("blockdev", &["--getsize64", source])?;
    stdout.trim().parse::<i64>().map_err(|e| {
        Status::internal(format!(
            "Could not parse size of {} from {:?}: {}",
            source,
            stdout.trim(),
            e
        ))
    })
}

pub fn statistics(path: &str) -> PlatformResult<VolumeStatistics> {
    let stat = statfs(path).map_err(|e| {
        Status::internal(format!("Failed to statfs {}: {}", path, e))
    })?;

    let block_size = stat.block_size() as i64;
    let total_bytes = stat.blocks() as i64 * block_size;
    let available_bytes = stat.blocks_available() as i64 * block_size;
    let used_bytes = (stat.blocks() as i64 - stat.blocks_free() as i64) * block_size;

    let total_inodes = stat.files() as i64;
    let available_inodes = stat.files_free() as i64;

    Ok(VolumeStatistics {
        available_bytes,
        total_bytes,
        used_bytes,
        available_inodes,
        total_inodes,
        used_inodes: total_inodes - available_inodes,
    })
}

/// Grow the filesystem on `source`, mounted at `target`, online.
pub fn resize_filesystem(source: &str, target: &str, fs_type: &str) -> PlatformResult<()> {
    info!(source = %source, target = %target, fs_type = %fs_type, "Resizing filesystem");

    match fs_type.to_lowercase().as_str() {
        "ext4" => run_command("resize2fs", &[source])?,
        // xfs_growfs works on the mount point, not the device
        "xfs" => run_command("xfs_growfs", &[target])?,
        other => {
            return Err(Status::invalid_argument(format!(
                "Resize of {} filesystems is not supported",
                other
            )));
        }
    };

    Ok(())
}

/// Validate filesystem type for Linux.
pub fn validate_fs_type(fs_type: &str) -> PlatformResult<&'static str> {
    match fs_type.to_lowercase().as_str() {
        "ext4" | "" => Ok(DEFAULT_FS_TYPE),
        "xfs" => Ok("xfs"),
        _ => Err(Status::invalid_argument(format!(
            "Unsupported filesystem on Linux: {}. Supported: ext4, xfs",
            fs_type
        ))),
    }
}

/// [`Mounter`] backed by the host's tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxMounter;

impl Mounter for LinuxMounter {
    fn format(&self, source: &str, fs_type: &str) -> PlatformResult<()> {
        format_device(source, fs_type)
    }

    fn is_formatted(&self, source: &str) -> PlatformResult<bool> {
        Ok(!needs_formatting(source)?)
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: Option<&str>,
        options: &[String],
    ) -> PlatformResult<()> {
        mount_device(source, target, fs_type, options)
    }

    fn unmount(&self, target: &str) -> PlatformResult<()> {
        unmount(target)
    }

    fn is_mounted(&self, target: &str) -> PlatformResult<bool> {
        is_mounted(target)
    }

    fn is_attached(&self, source: &str) -> PlatformResult<()> {
        is_attached(source)
    }

    fn resolve_device(&self, path: &str) -> PlatformResult<String> {
        let resolved = fs::canonicalize(path).map_err(|e| {
            Status::internal(format!(
                "error evaluating the symbolic link {:?}: {}",
                path, e
            ))
        })?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    fn is_block_device(&self, path: &str) -> PlatformResult<bool> {
        is_block_device(path)
    }

    fn device_size(&self, source: &str) -> PlatformResult<i64> {
        device_size(source)
    }

    fn statistics(&self, path: &str) -> PlatformResult<VolumeStatistics> {
        statistics(path)
    }

    fn needs_resize(&self, source: &str, target: &str) -> PlatformResult<bool> {
        let device = device_size(source)?;
        let filesystem = statistics(target)?.total_bytes;
        debug!(
            source = %source,
            device_bytes = device,
            filesystem_bytes = filesystem,
            "Comparing device and filesystem size"
        );
        Ok(device > filesystem)
    }

    fn resize(&self, source: &str, target: &str, fs_type: &str) -> PlatformResult<()> {
        resize_filesystem(source, target, fs_type)
    }
}
