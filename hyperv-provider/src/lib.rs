//! Hyper-V storage provider library
//!
//! Serves the volume REST API on the Hyper-V host and carries it out through
//! a persistent PowerShell process.
//!
//! The library is split into several modules:
//! - `powershell`: cmdlet rendering, the shell process and error-code extraction
//! - `vhd`: virtual disk and VM operations expressed as cmdlets
//! - `service`: the idempotent volume orchestrator
//! - `server`: axum router, API-key middleware and graceful serving
//! - `metrics`: Prometheus metrics collection

pub mod metrics;
pub mod powershell;
pub mod server;
pub mod service;
pub mod vhd;

pub use powershell::{PowerShell, Runner, Shell};
pub use service::VolumeService;
