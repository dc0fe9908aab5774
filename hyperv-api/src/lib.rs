//! Hyper-V CSI REST contract
//!
//! Wire types shared by the provider (which serves the REST surface) and the
//! CSI driver (which consumes it):
//! - `error`: the `{code, message}` envelope and the code/HTTP mappings
//! - `models`: request/response bodies and the shell's JSON documents
//! - `units`: size constants and byte formatting

pub mod error;
pub mod models;
pub mod units;

pub use error::{ApiError, code_from_name, code_name, http_status};

/// Header carrying the shared secret on every REST call.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Default port the provider listens on.
pub const DEFAULT_SERVICE_PORT: u16 = 8080;

/// Virtual disk format created for new volumes.
pub const VHD_TYPE: &str = ".vhdx";

/// PowerShell module providing the `*-PV*` cmdlets.
pub const POWERSHELL_MODULE: &str = "khyperv-csi";
