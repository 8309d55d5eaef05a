//! Workflow execution runtime
//!
//! Builds validated task graphs from workflow definitions, runs them over a
//! pool of local and remote slots, and keeps the catalogue of remote nodes.

pub mod config;
mod executor;
mod graph;
mod loader;
mod registry;
mod runtime;

pub use config::{ConfigError, EngineConfig, RetryPolicy, Settings, StorageConfig};
pub use executor::{BlockedTask, FailedTask, RunContext, RunReport, Slot, WorkflowExecutor};
pub use graph::{ModuleNode, TaskGraph, TaskNode};
pub use loader::{WorkflowCatalog, WorkflowSummary};
pub use registry::{NodeRecord, NodeRegistration, NodeRegistry, RegistryError};
pub use runtime::{PreparedRun, RunManifest, Runtime, MANIFEST_FILE};
