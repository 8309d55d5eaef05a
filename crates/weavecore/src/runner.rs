use crate::storage::PathMapping;
use crate::DispatchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What a slot is asked to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub task_id: String,
    /// Fully substituted shell command.
    pub command: String,
    /// Per-task directory under the results area, already translated for
    /// the runner's host.
    pub working_dir: PathBuf,
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// The text kept in a status record: stdout, or stderr when stdout is empty.
    pub fn summary(&self) -> &str {
        if self.stdout.trim().is_empty() {
            self.stderr.trim()
        } else {
            self.stdout.trim()
        }
    }

    /// Error text for a failed command: stderr, falling back to stdout.
    pub fn failure_text(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.exit_code {
            Some(code) if text.is_empty() => format!("command exited with code {}", code),
            None if text.is_empty() => "command terminated by signal".to_string(),
            _ => text.to_string(),
        }
    }
}

/// Executes one command on one execution slot.
///
/// Implementations must stop their process or session when the returned
/// future is dropped; the engine relies on that for timeouts and cancellation.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Human-readable slot location, e.g. `local` or `node worker-1`.
    fn describe(&self) -> String;

    /// Path rewriting for hosts that mount Shared Storage elsewhere.
    fn path_mapping(&self) -> Option<&PathMapping> {
        None
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DispatchError>;
}

/// Connection details for a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_file: Option<PathBuf>,
}

/// Secure-shell transport. One fresh session per call.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Authenticate and disconnect without running a command.
    async fn handshake(
        &self,
        endpoint: &RemoteEndpoint,
        timeout: Duration,
    ) -> Result<(), DispatchError>;

    async fn exec(
        &self,
        endpoint: &RemoteEndpoint,
        command: &str,
    ) -> Result<CommandOutput, DispatchError>;
}
