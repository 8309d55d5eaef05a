//! Core abstractions for taskweave
//!
//! Workflow definitions, argument and placeholder handling, Shared Storage
//! with its status records, and the traits that execution slots implement.
//! Everything else in the workspace depends on this crate.

pub mod arguments;
mod error;
pub mod events;
pub mod runner;
pub mod status;
pub mod storage;
pub mod template;
mod workflow;

pub use arguments::Arguments;
pub use error::{
    DefinitionError, DefinitionProblem, DefinitionReport, DispatchError, NameKind, StorageError,
    WeaveError,
};
pub use events::{EventBus, ExecutionEvent};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RemoteEndpoint, RemoteShell};
pub use status::{State, StatusRecord, StatusStore};
pub use storage::{Area, PathMapping, SharedStorage};
pub use workflow::{ModuleSpec, TaskId, TaskSpec, WorkflowDefinition};

/// Result type for taskweave operations
pub type Result<T> = std::result::Result<T, WeaveError>;
