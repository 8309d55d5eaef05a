//! Command runners for the weave engine
//!
//! `LocalRunner` executes commands as child processes of the coordinator.
//! `RemoteRunner` executes them on a registered node through a
//! `RemoteShell`, with `OpenSsh` as the production transport.

mod local;
mod remote;
mod ssh;

pub use local::LocalRunner;
pub use remote::{quote, RemoteRunner};
pub use ssh::OpenSsh;
