use std::path::{Path, PathBuf};
use weavecore::{DefinitionError, WeaveError, WorkflowDefinition};

pub const CONFIG_FILE: &str = "workflow_config.yaml";

/// A catalogue entry: workflow name with its modules and their task names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub name: String,
    pub modules: Vec<(String, Vec<String>)>,
}

/// Workflows stored as `<dir>/<name>/workflow_config.yaml`.
pub struct WorkflowCatalog {
    dir: PathBuf,
}

impl WorkflowCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.dir.join(name).join(CONFIG_FILE)
    }

    /// Every loadable workflow, sorted by name. Unparseable definitions are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<WorkflowSummary>, WeaveError> {
        if !self.dir.exists() {
            tracing::warn!("Workflows directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.config_path(&name).is_file() {
                    names.push(name);
                }
            }
        }
        names.sort();

        let mut summaries = Vec::new();
        for name in names {
            match self.load(&name) {
                Ok(definition) => summaries.push(WorkflowSummary {
                    name,
                    modules: definition
                        .modules
                        .iter()
                        .map(|m| (m.name.clone(), m.tasks.iter().map(|t| t.name.clone()).collect()))
                        .collect(),
                }),
                Err(e) => tracing::warn!("Skipping workflow {}: {}", name, e),
            }
        }
        Ok(summaries)
    }

    pub fn load(&self, name: &str) -> Result<WorkflowDefinition, WeaveError> {
        let path = self.config_path(name);
        if name.is_empty() || name.contains(['/', '\\']) || !path.is_file() {
            return Err(DefinitionError::WorkflowNotFound(name.to_string()).into());
        }
        let source = std::fs::read_to_string(&path)?;
        tracing::debug!("Loading workflow {} from {}", name, path.display());
        Ok(WorkflowDefinition::from_yaml(name, &source)?)
    }

    /// Load several workflows. Definition errors from every workflow are
    /// returned together; I/O errors stop at the first one.
    pub fn load_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<WorkflowDefinition>, WeaveError> {
        let mut definitions = Vec::with_capacity(names.len());
        let mut errors = Vec::new();
        for name in names {
            match self.load(name.as_ref()) {
                Ok(definition) => definitions.push(definition),
                Err(WeaveError::Definition(e)) => errors.push(e),
                Err(e) => return Err(e),
            }
        }
        match errors.len() {
            0 => Ok(definitions),
            1 => Err(errors.remove(0).into()),
            _ => Err(DefinitionError::Several(errors).into()),
        }
    }
}
