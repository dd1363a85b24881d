//! botstatus keeps track of whether a set of named services is alive. Local bots register
//! themselves with descriptor files and are checked against the OS process table; remote
//! nodes are asked over HTTP. Results are merged into one cached snapshot that is refreshed
//! on demand, together with the last error seen for every unreachable node.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Error handling.
pub mod error;

/// Last error per remote node.
pub mod history;

/// Uniform status model.
pub mod model;

/// Local process and remote node probes.
pub mod probe;

/// Grouped reports and text rendering.
pub mod report;

/// Status cache and query facade.
pub mod status;
