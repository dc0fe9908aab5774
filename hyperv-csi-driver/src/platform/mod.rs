//! Platform operations for the CSI Node service
//!
//! Formatting, mounting, resizing and usage statistics for the disks Hyper-V
//! attaches to a Linux guest. The node service reaches them through the
//! [`Mounter`] trait so its request handling can be tested without root.
//!
//! # Usage
//!
//! ```ignore
//! use crate::platform::{LinuxMounter, Mounter};
//!
//! let mounter = LinuxMounter;
//! if !mounter.is_formatted(device)? {
//!     mounter.format(device, "ext4")?;
//! }
//! mounter.mount(device, staging_path, Some("ext4"), &[])?;
//! ```

mod linux;

use tonic::Status;

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, Status>;

pub use linux::{
    DEFAULT_FS_TYPE, LinuxMounter, device_size, format_device, is_attached, is_block_device,
    is_mounted, mount_device, needs_formatting, resize_filesystem, statistics, unmount,
    validate_fs_type,
};

/// Byte and inode usage of a mounted filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeStatistics {
    pub available_bytes: i64,
    pub total_bytes: i64,
    pub used_bytes: i64,
    pub available_inodes: i64,
    pub total_inodes: i64,
    pub used_inodes: i64,
}

/// Disk and mount operations used by the node service.
pub trait Mounter: Send + Sync + 'static {
    /// Create a `fs_type` filesystem on `source`.
    fn format(&self, source: &str, fs_type: &str) -> PlatformResult<()>;

    /// Whether `source` already carries a filesystem.
    fn is_formatted(&self, source: &str) -> PlatformResult<bool>;

    /// Mount `source` on `target`. A `bind` option with a block device
    /// source creates `target` as a file rather than a directory.
    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: Option<&str>,
        options: &[String],
    ) -> PlatformResult<()>;

    /// Unmount `target`; a path that is not mounted is not an error.
    fn unmount(&self, target: &str) -> PlatformResult<()>;

    fn is_mounted(&self, target: &str) -> PlatformResult<bool>;

    /// Fails unless the kernel reports the disk behind `source` as running.
    fn is_attached(&self, source: &str) -> PlatformResult<()>;

    /// Follow the symlink chain at `path` to the device node.
    fn resolve_device(&self, path: &str) -> PlatformResult<String>;

    fn is_block_device(&self, path: &str) -> PlatformResult<bool>;

    /// Size of the block device at `source` in bytes.
    fn device_size(&self, source: &str) -> PlatformResult<i64>;

    fn statistics(&self, path: &str) -> PlatformResult<VolumeStatistics>;

    /// Whether the device at `source` is larger than the filesystem mounted
    /// at `target`.
    fn needs_resize(&self, source: &str, target: &str) -> PlatformResult<bool>;

    /// Grow the filesystem mounted at `target` to fill `source`.
    fn resize(&self, source: &str, target: &str, fs_type: &str) -> PlatformResult<()>;
}
