use crate::config::EngineConfig;
use crate::executor::{RunContext, RunReport, Slot, WorkflowExecutor};
use crate::graph::TaskGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use weavecore::{
    Arguments, CommandRunner, EventBus, ExecutionEvent, SharedStorage, State, StatusStore,
    StorageError, WeaveError, WorkflowDefinition,
};

pub const MANIFEST_FILE: &str = "run.json";

/// `run.json` in every run directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub workflows: Vec<String>,
    pub arguments: Arguments,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<RunReport>,
}

impl RunManifest {
    pub fn load(run_dir: &Path) -> Result<Self, WeaveError> {
        let text = std::fs::read_to_string(run_dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save(&self, run_dir: &Path) -> Result<(), WeaveError> {
        let path = run_dir.join(MANIFEST_FILE);
        let temp = run_dir.join(format!(".{}.tmp", MANIFEST_FILE));
        std::fs::write(&temp, serde_json::to_string_pretty(self)?)
            .map_err(|e| StorageError::io(&temp, e))?;
        std::fs::rename(&temp, &path).map_err(|e| StorageError::io(&path, e))?;
        Ok(())
    }
}

/// A validated run whose directory and `pending` records already exist.
pub struct PreparedRun {
    pub run_id: String,
    pub storage: SharedStorage,
    pub status: StatusStore,
    pub graph: TaskGraph,
    pub arguments: Arguments,
    manifest: RunManifest,
}

impl PreparedRun {
    pub fn run_dir(&self) -> &Path {
        self.storage.root()
    }
}

/// Entry point for planning and executing runs
pub struct Runtime {
    storage: SharedStorage,
    config: EngineConfig,
    event_bus: Arc<EventBus>,
    local_runner: Arc<dyn CommandRunner>,
}

impl Runtime {
    pub fn new(
        storage: SharedStorage,
        config: EngineConfig,
        local_runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            storage,
            config,
            event_bus,
            local_runner,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Validate without touching storage.
    pub fn validate(
        &self,
        definitions: &[WorkflowDefinition],
        arguments: &Arguments,
    ) -> Result<TaskGraph, WeaveError> {
        Ok(TaskGraph::build(definitions, arguments)?)
    }

    /// Build the graph, create a fresh run directory and write a `pending`
    /// record for every task and module. Nothing is created when the
    /// definitions are invalid.
    pub fn plan(
        &self,
        definitions: &[WorkflowDefinition],
        arguments: Arguments,
    ) -> Result<PreparedRun, WeaveError> {
        let graph = TaskGraph::build(definitions, &arguments)?;

        let run_id = new_run_id();
        let storage = absolute(self.storage.root())
            .map(SharedStorage::new)?
            .for_run(&run_id)?;
        storage.ensure_all()?;
        let status = StatusStore::new(storage.clone())?;

        for idx in graph.task_indices() {
            let task_id = graph.task(idx).id.to_string();
            let deps: Vec<String> = graph
                .dependencies(idx)
                .map(|d| graph.task(d).id.to_string())
                .collect();
            let body = if deps.is_empty() {
                format!("Task {} is pending", task_id)
            } else {
                format!("Waiting for dependencies to complete: {}", deps.join(", "))
            };
            status.write(&task_id, State::Pending, &body)?;
        }
        for module in graph.modules() {
            status.write(&module.name, State::Pending, &format!("Module {} is pending", module.name))?;
        }

        let manifest = RunManifest {
            run_id: run_id.clone(),
            workflows: graph.workflows().to_vec(),
            arguments: arguments.clone(),
            started_at: Utc::now(),
            finished_at: None,
            report: None,
        };
        manifest.save(storage.root())?;

        tracing::info!(
            "Planned run {} with {} tasks in {}",
            run_id,
            graph.len(),
            storage.root().display()
        );
        Ok(PreparedRun {
            run_id,
            storage,
            status,
            graph,
            arguments,
            manifest,
        })
    }

    /// Local slots come first, then `remote_slots`.
    pub fn slots(&self, remote_slots: Vec<Slot>) -> Vec<Slot> {
        let mut slots: Vec<Slot> = (1..=self.config.local_slots)
            .map(|n| Slot::new(format!("local#{}", n), Arc::clone(&self.local_runner)))
            .collect();
        slots.extend(remote_slots);
        slots
    }

    pub async fn execute(
        &self,
        prepared: PreparedRun,
        remote_slots: Vec<Slot>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, WeaveError> {
        let executor = WorkflowExecutor::new(self.slots(remote_slots), self.config.clone());
        let ctx = RunContext {
            run_id: prepared.run_id.clone(),
            storage: prepared.storage.clone(),
            status: prepared.status.clone(),
            arguments: prepared.arguments.clone(),
            cancellation,
            events: Arc::clone(&self.event_bus),
        };

        let report = executor.run(&prepared.graph, &ctx).await?;

        let mut manifest = prepared.manifest;
        manifest.finished_at = Some(Utc::now());
        manifest.report = Some(report.clone());
        manifest.save(prepared.storage.root())?;
        Ok(report)
    }

    pub async fn run(
        &self,
        definitions: &[WorkflowDefinition],
        arguments: Arguments,
        remote_slots: Vec<Slot>,
        cancellation: CancellationToken,
    ) -> Result<RunReport, WeaveError> {
        let prepared = self.plan(definitions, arguments)?;
        self.execute(prepared, remote_slots, cancellation).await
    }
}

fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run_{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Commands run inside per-task directories, so stored paths must not be
/// relative to the coordinator's working directory.
fn absolute(path: &Path) -> Result<PathBuf, WeaveError> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
