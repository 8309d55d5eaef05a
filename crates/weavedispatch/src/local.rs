use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use weavecore::{CommandOutput, CommandRunner, CommandSpec, DispatchError};

/// Runs commands through `sh -c` on the coordinating host.
#[derive(Debug, Clone)]
pub struct LocalRunner {
    shell: PathBuf,
}

impl LocalRunner {
    pub fn new() -> Self {
        Self::with_shell("/bin/sh")
    }

    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    fn describe(&self) -> String {
        "local".to_string()
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DispatchError> {
        tracing::debug!("Spawning {} in {}", spec.task_id, spec.working_dir.display());

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Timeouts and cancellation drop this future.
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| DispatchError::Spawn(format!("{}: {}", self.shell.display(), e)))?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(command: &str, dir: &std::path::Path) -> CommandSpec {
        CommandSpec {
            task_id: "test:task".to_string(),
            command: command.to_string(),
            working_dir: dir.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalRunner::new()
            .run(spec("echo out; echo err >&2; exit 3", dir.path()))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn runs_inside_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        LocalRunner::new()
            .run(spec("echo hi > marker.txt", dir.path()))
            .await
            .unwrap();
        assert!(dir.path().join("marker.txt").exists());
    }

    #[tokio::test]
    async fn missing_shell_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalRunner::with_shell("/nonexistent/shell")
            .run(spec("true", dir.path()))
            .await;
        assert!(matches!(result, Err(DispatchError::Spawn(_))));
    }
}
