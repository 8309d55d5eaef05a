use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use weavecore::{
    CommandOutput, CommandRunner, CommandSpec, DispatchError, PathMapping, RemoteEndpoint,
    RemoteShell,
};

/// Runs commands on one registered node, one session per command.
pub struct RemoteRunner {
    endpoint: RemoteEndpoint,
    shell: Arc<dyn RemoteShell>,
    mapping: Option<PathMapping>,
}

impl RemoteRunner {
    pub fn new(endpoint: RemoteEndpoint, shell: Arc<dyn RemoteShell>) -> Self {
        Self {
            endpoint,
            shell,
            mapping: None,
        }
    }

    /// Paths under the local storage root are rewritten for this node.
    pub fn with_mapping(mut self, mapping: Option<PathMapping>) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    fn wrap(command: &str, working_dir: &Path) -> String {
        let dir = quote(&working_dir.to_string_lossy());
        format!("mkdir -p {dir} && cd {dir} && {command}", dir = dir, command = command)
    }
}

#[async_trait]
impl CommandRunner for RemoteRunner {
    fn describe(&self) -> String {
        format!("node {}", self.endpoint.name)
    }

    fn path_mapping(&self) -> Option<&PathMapping> {
        self.mapping.as_ref()
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, DispatchError> {
        tracing::debug!("Dispatching {} to node {}", spec.task_id, self.endpoint.name);
        let command = Self::wrap(&spec.command, &spec.working_dir);
        self.shell.exec(&self.endpoint, &command).await
    }
}

/// Quote `word` for a POSIX shell.
pub fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:+=,@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting() {
        assert_eq!(quote("/srv/weave/results/recon:resolve"), "/srv/weave/results/recon:resolve");
        assert_eq!(quote("with space"), "'with space'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn wraps_command_in_working_dir() {
        let wrapped = RemoteRunner::wrap("echo hi", Path::new("/mnt/weave/run 1/results/a:b"));
        assert_eq!(
            wrapped,
            "mkdir -p '/mnt/weave/run 1/results/a:b' && cd '/mnt/weave/run 1/results/a:b' && echo hi"
        );
    }
}
