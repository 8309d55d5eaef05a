use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use weavecore::{CommandOutput, DispatchError, RemoteEndpoint, RemoteShell};

/// `ssh` exits with 255 when the connection or authentication fails.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// `RemoteShell` backed by the system OpenSSH client.
///
/// Every call opens a fresh session in batch mode, so a missing key or an
/// unknown password prompt fails instead of hanging.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    program: PathBuf,
    connect_timeout: Duration,
}

impl OpenSsh {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn command(&self, endpoint: &RemoteEndpoint, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(endpoint.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)));
        if let Some(key) = &endpoint.key_file {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(format!("{}@{}", endpoint.username, endpoint.host))
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for OpenSsh {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn handshake(&self, endpoint: &RemoteEndpoint, timeout: Duration) -> Result<(), DispatchError> {
        // `true` is the cheapest command that proves the session authenticated.
        let output = tokio::time::timeout(timeout, self.exec(endpoint, "true"))
            .await
            .map_err(|_| DispatchError::Unreachable {
                node: endpoint.name.clone(),
                message: format!("no answer within {}s", timeout.as_secs()),
            })??;

        if output.success() {
            Ok(())
        } else {
            Err(DispatchError::Protocol(format!(
                "handshake with {} failed: {}",
                endpoint.name,
                output.failure_text()
            )))
        }
    }

    async fn exec(&self, endpoint: &RemoteEndpoint, command: &str) -> Result<CommandOutput, DispatchError> {
        tracing::debug!("ssh {}@{}:{} {}", endpoint.username, endpoint.host, endpoint.port, command);

        let output = self
            .command(endpoint, command)
            .output()
            .await
            .map_err(|e| DispatchError::Spawn(format!("{}: {}", self.program.display(), e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(DispatchError::Unreachable {
                node: endpoint.name.clone(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}
