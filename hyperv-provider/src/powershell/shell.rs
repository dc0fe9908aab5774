//! The persistent PowerShell process.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::error::{Result, ShellError};

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl ShellOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

/// A command interpreter that runs one command line at a time.
#[tonic::async_trait]
pub trait Shell: Send + 'static {
    async fn execute(&mut self, command: &str) -> Result<ShellOutput>;

    async fn close(&mut self);
}

/// A long-lived `pwsh` process fed commands over stdin.
///
/// Each command is wrapped so that its completion is signalled by a unique
/// marker line on both stdout and stderr. A caller may stop waiting at any
/// point; the markers of its command stay pending and the output up to them
/// is discarded before the next command runs.
pub struct PowerShell {
    program: String,
    module: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    pending_stdout: Option<String>,
    pending_stderr: Option<String>,
    /// Set while a command line is being written.
    writing: bool,
}

impl PowerShell {
    /// Start the shell and import `module` into it (skipped when empty).
    pub async fn open(program: &str, module: &str) -> Result<Self> {
        info!(shell = %program, module = %module, "Starting PowerShell");

        let mut child = Command::new(program)
            .args(["-NoLogo", "-NoProfile", "-NonInteractive", "-Command", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(ShellError::Closed)?;
        let stdout = child.stdout.take().ok_or(ShellError::Closed)?;
        let stderr = child.stderr.take().ok_or(ShellError::Closed)?;

        let mut shell = Self {
            program: program.to_string(),
            module: module.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            pending_stdout: None,
            pending_stderr: None,
            writing: false,
        };

        if !module.is_empty() {
            let output = shell
                .execute(&format!("Import-Module {}", module))
                .await?;
            if !output.success {
                return Err(ShellError::Runner {
                    message: format!("cannot import module {}: {}", module, output.stderr),
                    stderr: output.stderr,
                    code: tonic::Code::Internal,
                });
            }
        }

        Ok(shell)
    }

    fn wrap(command: &str, marker: &str) -> String {
        format!(
            "$hvFailed = $false; \
             try {{ $ErrorActionPreference = 'Stop'; {command} }} \
             catch {{ $hvFailed = $true; [Console]::Error.WriteLine($_.Exception.Message) }}; \
             [Console]::Out.WriteLine('{marker} ' + (-not $hvFailed)); \
             [Console]::Error.WriteLine('{marker}')\n"
        )
    }

    /// Replace the process with a fresh one. The old child is killed on drop.
    async fn restart(&mut self) -> Result<()> {
        let fresh = Self::open(&self.program, &self.module).await?;
        *self = fresh;
        Ok(())
    }

    /// Read both streams up to the pending markers.
    async fn collect(&mut self) -> Result<(String, String, Option<String>)> {
        let ((stdout, status), (stderr, _)) = tokio::try_join!(
            read_pending(&mut self.stdout, &mut self.pending_stdout),
            read_pending(&mut self.stderr, &mut self.pending_stderr)
        )?;
        Ok((stdout, stderr, status))
    }
}

/// Read lines up to the pending marker and clear it. Returns the collected
/// text and whatever followed the marker on its line.
async fn read_pending<R>(
    lines: &mut Lines<R>,
    pending: &mut Option<String>,
) -> Result<(String, Option<String>)>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let Some(marker) = pending.clone() else {
        return Ok((String::new(), None));
    };
    let mut collected = Vec::new();
    loop {
        match lines.next_line().await? {
            Some(line) => {
                if let Some(rest) = line.strip_prefix(marker.as_str()) {
                    let status = rest.trim().to_string();
                    *pending = None;
                    return Ok((collected.join("\n"), Some(status)));
                }
                collected.push(line);
            }
            None => return Err(ShellError::Closed),
        }
    }
}

#[tonic::async_trait]
impl Shell for PowerShell {
    async fn execute(&mut self, command: &str) -> Result<ShellOutput> {
        if self.writing {
            warn!("Previous command was cut off while being written, restarting PowerShell");
            self.restart().await?;
        }
        if self.pending_stdout.is_some() || self.pending_stderr.is_some() {
            let (stdout, stderr, _) = self.collect().await?;
            debug!(stdout = %stdout, stderr = %stderr, "Discarded output of an abandoned command");
        }

        let marker = format!("#hvcsi-{}#", uuid::Uuid::new_v4().simple());
        debug!(command = %command, "Executing PowerShell command");

        self.writing = true;
        self.stdin
            .write_all(Self::wrap(command, &marker).as_bytes())
            .await?;
        self.stdin.flush().await?;
        self.writing = false;

        self.pending_stdout = Some(marker.clone());
        self.pending_stderr = Some(marker);
        let (stdout, stderr, status) = self.collect().await?;

        Ok(ShellOutput {
            stdout,
            stderr,
            success: status.as_deref() == Some("True"),
        })
    }

    async fn close(&mut self) {
        if let Err(e) = self.stdin.write_all(b"exit\n").await {
            warn!(error = %e, "Failed to send exit to PowerShell");
        }
        match self.child.wait().await {
            Ok(status) => info!(status = %status, "PowerShell exited"),
            Err(e) => warn!(error = %e, "Failed to wait for PowerShell"),
        }
    }
}
