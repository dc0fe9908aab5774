//! Command/response layer over a persistent PowerShell process
//!
//! - `cmdlet`: typed cmdlet descriptors and pipeline rendering
//! - `shell`: the `Shell` seam and the production `pwsh` process
//! - `runner`: serialised execution and error-code extraction
//! - `decode`: JSON decoding of command output

pub mod cmdlet;
pub mod decode;
pub mod error;
pub mod runner;
pub mod shell;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cmdlet::{Cmdlet, build_pipeline};
pub use decode::{decode_list, decode_one};
pub use error::{Result, ShellError};
pub use runner::{Runner, extract_error_code};
pub use shell::{PowerShell, Shell, ShellOutput};
