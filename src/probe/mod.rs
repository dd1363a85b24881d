//! Status sources: the local process table and remote node health endpoints.

/// Self-registered local processes.
pub mod local;

/// Remote node health endpoints.
pub mod remote;

pub use local::{Descriptor, LiveProcess, ProcessTable, SysinfoProcessTable, probe_local};
pub use remote::{HttpNodeClient, NodeClient};
