//! A scripted `Shell` for exercising the command layer without PowerShell.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::error::Result;
use super::shell::{Shell, ShellOutput};

#[derive(Default)]
struct Script {
    expected: VecDeque<(String, ShellOutput)>,
    commands: Vec<String>,
    closed: bool,
}

/// Replays queued outputs in order, checking each command's prefix.
///
/// Clones share the same script so a test can keep a handle after moving
/// the shell into a runner.
#[derive(Clone, Default)]
pub struct ScriptedShell {
    script: Arc<Mutex<Script>>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` as the answer to the next command starting with `prefix`.
    pub fn expect(&self, prefix: &str, output: ShellOutput) -> &Self {
        self.lock().expected.push_back((prefix.to_string(), output));
        self
    }

    /// Every command executed so far.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock().expected.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[tonic::async_trait]
impl Shell for ScriptedShell {
    async fn execute(&mut self, command: &str) -> Result<ShellOutput> {
        let mut script = self.lock();
        script.commands.push(command.to_string());
        match script.expected.pop_front() {
            Some((prefix, output)) if command.starts_with(&prefix) => Ok(output),
            Some((prefix, _)) => Ok(ShellOutput::failed(format!(
                "INTERNAL: expected '{}', got '{}'",
                prefix, command
            ))),
            None => Ok(ShellOutput::failed(format!(
                "INTERNAL: unexpected command '{}'",
                command
            ))),
        }
    }

    async fn close(&mut self) {
        self.lock().closed = true;
    }
}
