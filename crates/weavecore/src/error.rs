use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeaveError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Problems found while reading or validating workflow definitions.
///
/// Anything in this enum stops a run before a single task executes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("Invalid YAML in workflow '{workflow}': {message}")]
    Yaml { workflow: String, message: String },

    #[error("Invalid configuration in workflow '{0}': 'workflow' section is required")]
    MissingWorkflowSection(String),

    #[error("Invalid configuration in workflow '{0}': 'modules' section is required")]
    MissingModulesSection(String),

    #[error("Malformed argument '{0}': expected key=value")]
    MalformedArgument(String),

    #[error("No workflow configuration found for '{0}'")]
    WorkflowNotFound(String),

    #[error("{0}")]
    Invalid(DefinitionReport),

    #[error("{}", join_errors(.0))]
    Several(Vec<DefinitionError>),
}

fn join_errors(errors: &[DefinitionError]) -> String {
    let mut text = format!("{} workflow(s) failed to load:", errors.len());
    for error in errors {
        text.push_str("\n");
        text.push_str(&error.to_string());
    }
    text
}

/// A single validation finding. Builders collect all of them before failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionProblem {
    MalformedTaskEntry { module: String, reason: String },
    EmptyModuleName { workflow: String, index: usize },
    /// A module or task name that cannot be used as a status id.
    InvalidName { kind: NameKind, name: String, reason: String },
    EmptyModule { module: String },
    DuplicateModule { module: String },
    DuplicateTask { task: String },
    MissingCommand { task: String },
    UnresolvedDependency { task: String, dependency: String },
    Cycle { tasks: Vec<String> },
    MissingArgument { argument: String, tasks: Vec<String> },
    UnknownOutputReference { task: String, reference: String },
    OutputNotUpstream { task: String, reference: String },
}

impl fmt::Display for DefinitionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedTaskEntry { module, reason } => {
                write!(f, "malformed task entry in module '{}': {}", module, reason)
            }
            Self::InvalidName { kind, name, reason } => {
                write!(f, "{} name '{}' is invalid: {}", kind, name.escape_debug(), reason)
            }
            Self::EmptyModuleName { workflow, index } => {
                write!(f, "module #{} in workflow '{}' has no name", index, workflow)
            }
            Self::EmptyModule { module } => write!(f, "module '{}' has no tasks", module),
            Self::DuplicateModule { module } => {
                write!(f, "module '{}' is defined more than once", module)
            }
            Self::DuplicateTask { task } => write!(f, "task '{}' is defined more than once", task),
            Self::MissingCommand { task } => write!(f, "task '{}' has no command", task),
            Self::UnresolvedDependency { task, dependency } => {
                write!(f, "dependency '{}' not found for task '{}'", dependency, task)
            }
            Self::Cycle { tasks } => write!(f, "dependency cycle: {}", tasks.join(" -> ")),
            Self::MissingArgument { argument, tasks } => write!(
                f,
                "missing required argument '{}' (required by: {})",
                argument,
                tasks.join(", ")
            ),
            Self::UnknownOutputReference { task, reference } => write!(
                f,
                "task '{}' references output of unknown task '{}'",
                task, reference
            ),
            Self::OutputNotUpstream { task, reference } => write!(
                f,
                "task '{}' references output of '{}' which is not one of its dependencies",
                task, reference
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Module,
    Task,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module => f.write_str("module"),
            Self::Task => f.write_str("task"),
        }
    }
}

/// Every problem found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionReport {
    pub problems: Vec<DefinitionProblem>,
}

impl DefinitionReport {
    pub fn push(&mut self, problem: DefinitionProblem) {
        self.problems.push(problem);
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    /// Turn a non-empty report into an error.
    pub fn into_result(self) -> Result<(), DefinitionError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(DefinitionError::Invalid(self))
        }
    }
}

impl fmt::Display for DefinitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "workflow definition has {} problem(s):", self.problems.len())?;
        for problem in &self.problems {
            write!(f, "\n  - {}", problem)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid storage key: '{0}'")]
    InvalidKey(String),

    #[error("Unknown storage area: '{0}'")]
    UnknownArea(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to get a command running or to hear back from it.
///
/// A non-zero exit code is not a dispatch error; it comes back as a
/// normal `CommandOutput`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("Node '{node}' unreachable: {message}")]
    Unreachable { node: String, message: String },

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Remote protocol error: {0}")]
    Protocol(String),
}
