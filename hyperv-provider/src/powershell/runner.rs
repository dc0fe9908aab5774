use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::Mutex;
use tonic::Code;
use tracing::{debug, warn};

use super::cmdlet::{Cmdlet, build_pipeline};
use super::error::{Result, ShellError};
use super::shell::Shell;
use crate::metrics;

static ERROR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z_]+").expect("Invalid regex pattern"));

/// Find the canonical gRPC code the PowerShell module prints at the start
/// of its error output. Anything unrecognised is `Unknown`.
pub fn extract_error_code(stderr: &str) -> Code {
    ERROR_CODE_RE
        .find(stderr)
        .and_then(|m| hyperv_api::code_from_name(m.as_str()))
        .unwrap_or(Code::Unknown)
}

/// Serialises command pipelines onto a single shell.
///
/// The shell is not reentrant, so every invocation holds the lock for the
/// full round trip.
pub struct Runner<S: Shell> {
    shell: Mutex<Option<S>>,
}

impl<S: Shell> Runner<S> {
    pub fn new(shell: S) -> Self {
        Self {
            shell: Mutex::new(Some(shell)),
        }
    }

    /// Run a pipeline, discarding its output.
    pub async fn run(&self, cmdlets: &[Cmdlet]) -> Result<()> {
        self.run_with_result(cmdlets).await.map(|_| ())
    }

    /// Run a pipeline and return its trimmed stdout.
    pub async fn run_with_result(&self, cmdlets: &[Cmdlet]) -> Result<String> {
        let command = build_pipeline(cmdlets)?;

        let mut guard = self.shell.lock().await;
        let shell = guard.as_mut().ok_or(ShellError::Closed)?;
        let output = shell.execute(&command).await?;
        drop(guard);

        if !output.success {
            metrics::record_shell_command("failure");
            let code = extract_error_code(&output.stderr);
            warn!(command = %command, code = ?code, stderr = %output.stderr.trim(), "PowerShell command failed");
            return Err(ShellError::Runner {
                message: format!("command failed: {}", output.stderr.trim()),
                stderr: output.stderr,
                code,
            });
        }

        metrics::record_shell_command("success");
        debug!(command = %command, "PowerShell command completed");
        Ok(output.stdout.trim().to_string())
    }

    /// Release the shell. Later calls fail with `ShellError::Closed`.
    pub async fn close(&self) {
        if let Some(mut shell) = self.shell.lock().await.take() {
            shell.close().await;
        }
    }
}
