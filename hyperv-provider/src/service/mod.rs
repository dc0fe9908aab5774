//! Idempotent volume management over the PowerShell backend.

pub mod volume;

pub use volume::VolumeService;
