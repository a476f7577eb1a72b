//! Error types for the process manager.

use std::path::PathBuf;

/// Result type alias for process manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while supervising a job process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // CLI Errors
    // =========================================================================
    /// Missing or malformed command-line input.
    #[error("{0}")]
    InvalidUsage(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file does not exist.
    #[error("configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Configuration file could not be parsed as YAML.
    #[error("failed to parse configuration {path}: {reason}")]
    ConfigMalformed { path: PathBuf, reason: String },

    /// Configuration parsed but a field is invalid.
    #[error("invalid configuration field '{field}': {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    /// Job or process name is unsafe for filesystem use.
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    // =========================================================================
    // Container Lifecycle Errors
    // =========================================================================
    /// A container with this ID is already running.
    #[error("process is already running: {0}")]
    AlreadyRunning(String),

    /// Container not known to the runtime.
    #[error("container does not exist: {0}")]
    ContainerNotFound(String),

    /// Container already known to the runtime.
    #[error("container already exists: {0}")]
    ContainerExists(String),

    /// The OCI runtime exited non-zero for a reason we do not classify.
    #[error("runtime {operation} failed: {stderr}")]
    RuntimeFailed { operation: String, stderr: String },

    /// Another invocation holds the per-process lock.
    #[error("failed to acquire lock for {id}: another bpm invocation is in progress")]
    Busy { id: String },

    /// The container exists but has no usable PID.
    #[error("no pid for job")]
    NoPid,

    /// Container lookup failed while resolving a job.
    #[error("failed to get job: {0}")]
    JobLookup(#[source] Box<Error>),

    /// A termination signal arrived mid-transaction.
    #[error("operation interrupted")]
    Interrupted,

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Filesystem failure, wrapped with the path that failed.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
