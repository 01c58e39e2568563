//! Error types for pipetree

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipetree operations
pub type Result<T> = std::result::Result<T, PipetreeError>;

/// Main error type for pipetree
#[derive(Error, Debug)]
pub enum PipetreeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Pipeline file parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find pipeline file (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to include file '{path}': {error}")]
    IncludeFile { path: PathBuf, error: String },

    #[error("Circular include detected: {0}")]
    CircularInclude(String),

    #[error("Task '{0}' has no command, children or include")]
    EmptyNode(String),
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("[{task}] failed to start: {source}")]
    Start {
        task: String,
        #[source]
        source: io::Error,
    },

    #[error("[{task}] command failed with exit code {code:?}")]
    CommandFailed { task: String, code: Option<i32> },

    #[error("[{task}] readiness check failed: {reason}")]
    Readiness {
        task: String,
        #[source]
        reason: ReadinessError,
    },
}

/// Errors reported by a readiness waiter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    #[error("'{address}' not ready after {seconds}s: {last_error}")]
    Timeout {
        address: String,
        seconds: u64,
        last_error: String,
    },

    #[error("invalid readiness descriptor: {0}")]
    Invalid(String),
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Returns true when the error means the process never started
/// (as opposed to starting and exiting non-zero)
pub fn is_start_failure(err: &ExecutionError) -> bool {
    matches!(err, ExecutionError::Start { .. })
}
