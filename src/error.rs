//! Error handling for botstatus.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing the configuration file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names a variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration field could not be parsed.
    #[error("Invalid duration value for '{field}': '{value}'")]
    InvalidDuration {
        /// The configuration key holding the duration.
        field: &'static str,
        /// The raw value that failed to parse.
        value: String,
    },

    /// The environment expansion pattern failed to compile.
    #[error("Invalid expansion pattern: {0}")]
    PatternError(#[from] regex::Error),

    /// A node was configured under an id the engine uses internally.
    #[error("Node id '{0}' is reserved")]
    ReservedNodeId(String),
}

/// Error type for a single self-registered process descriptor.
///
/// These never abort a refresh; the offending file is skipped.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Error reading the descriptor file.
    #[error("Failed to read descriptor {path}: {source}")]
    ReadError {
        /// Path of the descriptor.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing the descriptor JSON.
    #[error("Failed to parse descriptor {path}: {source}")]
    ParseError {
        /// Path of the descriptor.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: serde_json::Error,
    },

    /// Descriptor carries no command-line arguments to compare against.
    #[error("Descriptor {0} has an empty cmdline")]
    EmptyCmdline(PathBuf),
}

/// Failure to fetch or decode a remote node's health reply.
///
/// The `Display` text is what gets recorded as the node's last error.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Transport level failure (connect, timeout, body read).
    #[error("request to {address} failed: {source}")]
    Request {
        /// Address of the node.
        address: String,
        /// The underlying error that occurred.
        #[source]
        source: reqwest::Error,
    },

    /// The node answered with a non-success HTTP status.
    #[error("{address} answered with HTTP {status}")]
    Status {
        /// Address of the node.
        address: String,
        /// The status code returned.
        status: u16,
    },

    /// The node answered with a body that is not a status reply.
    #[error("malformed reply from {address}: {source}")]
    Decode {
        /// Address of the node.
        address: String,
        /// The underlying error that occurred.
        #[source]
        source: serde_json::Error,
    },

    /// The probe thread for the node panicked.
    #[error("probe of {address} panicked")]
    Panicked {
        /// Address of the node.
        address: String,
    },
}

/// Errors surfaced to callers of the status engine.
///
/// Per-source failures are absorbed into the snapshot and history; only conditions that
/// prevent a refresh from happening at all end up here.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The descriptor directory exists but could not be listed.
    #[error("failed to read status directory {path}: {source}")]
    StatusDir {
        /// The directory that was scanned.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Another refresh held the lock for longer than the configured bound.
    #[error("timed out after {0:?} waiting for the in-flight refresh")]
    LockTimeout(Duration),

    /// Lock guarding the cached snapshot was poisoned.
    #[error("status cache lock poisoned")]
    CachePoisoned,

    /// The HTTP client used for node probes could not be built.
    #[error("failed to build node client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `StatusError`.
impl<T> From<std::sync::PoisonError<T>> for StatusError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StatusError::CachePoisoned
    }
}
