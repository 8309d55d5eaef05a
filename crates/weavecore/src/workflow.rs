use crate::{DefinitionError, DefinitionProblem, DefinitionReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Composite task identity, rendered as `module:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TaskId {
    pub module: String,
    pub name: String,
}

impl TaskId {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Resolve a `requires` entry: bare names live in `owner_module`,
    /// `module:task` strings are global.
    pub fn resolve_reference(owner_module: &str, reference: &str) -> Self {
        match reference.split_once(':') {
            Some((module, name)) => Self::new(module, name),
            None => Self::new(owner_module, reference),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((module, name)) if !module.is_empty() && !name.is_empty() => {
                Ok(Self::new(module, name))
            }
            _ => Err(format!("'{}' is not a module:task id", s)),
        }
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TaskId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// One parsed workflow file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub name: String,
    pub modules: Vec<ModuleSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleSpec {
    pub name: String,
    pub tasks: Vec<TaskSpec>,
}

/// Task as written in the definition. Validation happens in the graph builder
/// so that every problem is reported together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub name: String,
    pub command: Option<String>,
    pub requires: Vec<String>,
    pub arguments: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            requires: Vec::new(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn requires(mut self, dependency: impl Into<String>) -> Self {
        self.requires.push(dependency.into());
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }
}

impl ModuleSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: ModuleSpec) -> Self {
        self.modules.push(module);
        self
    }

    pub fn task_count(&self) -> usize {
        self.modules.iter().map(|m| m.tasks.len()).sum()
    }

    /// Parse the declarative document:
    ///
    /// ```yaml
    /// workflow:
    ///   modules:
    ///     - name: recon
    ///       tasks:
    ///         - resolve:
    ///             command: dig {target}
    ///         - probe:
    ///             command: httpx -l {recon:resolve}
    ///             requires: resolve
    /// ```
    pub fn from_yaml(name: impl Into<String>, source: &str) -> Result<Self, DefinitionError> {
        let name = name.into();
        let raw: Option<RawDocument> =
            serde_yaml::from_str(source).map_err(|e| DefinitionError::Yaml {
                workflow: name.clone(),
                message: e.to_string(),
            })?;

        let workflow = raw
            .and_then(|doc| doc.workflow)
            .ok_or_else(|| DefinitionError::MissingWorkflowSection(name.clone()))?;
        let raw_modules = workflow
            .modules
            .ok_or_else(|| DefinitionError::MissingModulesSection(name.clone()))?;

        let mut report = DefinitionReport::default();
        let mut modules = Vec::with_capacity(raw_modules.len());
        for raw_module in raw_modules {
            let module_name = raw_module.name.unwrap_or_default();
            let mut tasks = Vec::new();
            for entry in raw_module.tasks.unwrap_or_default() {
                match parse_task_entry(&module_name, entry) {
                    Ok(task) => tasks.push(task),
                    Err(problem) => report.push(problem),
                }
            }
            modules.push(ModuleSpec {
                name: module_name,
                tasks,
            });
        }

        report.into_result()?;
        Ok(Self { name, modules })
    }
}

#[derive(Deserialize)]
struct RawDocument {
    workflow: Option<RawWorkflow>,
}

#[derive(Deserialize)]
struct RawWorkflow {
    modules: Option<Vec<RawModule>>,
}

#[derive(Deserialize)]
struct RawModule {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tasks: Option<Vec<serde_yaml::Mapping>>,
}

#[derive(Deserialize, Default)]
struct RawTask {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    requires: Option<Requires>,
    #[serde(default)]
    arguments: Option<BTreeMap<String, serde_yaml::Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Requires {
    One(String),
    Many(Vec<String>),
}

fn parse_task_entry(
    module: &str,
    entry: serde_yaml::Mapping,
) -> Result<TaskSpec, DefinitionProblem> {
    let malformed = |reason: String| DefinitionProblem::MalformedTaskEntry {
        module: module.to_string(),
        reason,
    };

    if entry.len() != 1 {
        return Err(malformed(format!(
            "expected a single `name: config` mapping, found {} keys",
            entry.len()
        )));
    }
    let (key, value) = entry
        .into_iter()
        .next()
        .ok_or_else(|| malformed("empty task entry".to_string()))?;
    let name = key
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| malformed("task name must be a string".to_string()))?;

    let raw: RawTask = if value.is_null() {
        RawTask::default()
    } else {
        serde_yaml::from_value(value)
            .map_err(|e| malformed(format!("task '{}': {}", name, e)))?
    };

    let requires = match raw.requires {
        None => Vec::new(),
        Some(Requires::One(dep)) => vec![dep],
        Some(Requires::Many(deps)) => deps,
    };

    let mut arguments = BTreeMap::new();
    for (key, value) in raw.arguments.unwrap_or_default() {
        let rendered = scalar_to_string(&value).ok_or_else(|| {
            malformed(format!(
                "task '{}': argument '{}' must be a scalar value",
                name, key
            ))
        })?;
        arguments.insert(key, rendered);
    }

    Ok(TaskSpec {
        name,
        command: raw.command,
        requires,
        arguments,
    })
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}
