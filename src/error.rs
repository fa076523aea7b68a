//! Error types for Deo

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Deo operations
pub type Result<T> = std::result::Result<T, DeoError>;

/// Main error type for Deo
#[derive(Error, Debug)]
pub enum DeoError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Target graph insertion would create a cycle
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// API misuse
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// Task execution errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Cleanup errors
    #[error("Disposal error: {0}")]
    Disposal(#[from] DisposalError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// YAML parsing errors
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find deofile (searched: {0})")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown setting '{0}'")]
    UnknownSetting(String),

    #[error("Invalid interpolation pattern '{pattern}': {error}")]
    InvalidPattern { pattern: String, error: String },

    #[error("Attempting to add target for unregistered task kind '{0}'")]
    UnknownTaskKind(String),

    #[error("Target '{0}' does not exist")]
    TargetNotFound(String),

    #[error("Option '{option}' is required for task '{task}'")]
    MissingOption { task: String, option: String },

    #[error("Invalid value for option '{name}': {error}")]
    InvalidOption { name: String, error: String },
}

/// Raised when adding a target's dependencies would close a loop in the graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Circular dependency detected: target '{target}' cannot depend on '{dependency}'")]
pub struct CycleError {
    pub target: String,
    pub dependency: String,
}

/// Errors caused by calling the engine incorrectly
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("Cannot run task again with the same runner")]
    RunnerReused,

    #[error("A name is required")]
    MissingName,

    #[error("Context for '{0}' is not attached to an orchestrator")]
    Detached(String),
}

/// Task execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Command failed with exit code {0:?}")]
    CommandFailed(Option<i32>),

    #[error("Failed to spawn '{command}': {error}")]
    Spawn { command: String, error: io::Error },

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Invalid task options: {0}")]
    InvalidOptions(#[from] ConfigError),

    #[error("File operation failed on {path}: {error}")]
    File { path: PathBuf, error: io::Error },

    #[error("Invalid glob pattern '{pattern}': {error}")]
    Glob { pattern: String, error: String },

    #[error("Cannot map sources to destination: {0}")]
    Mapping(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Cleanup failure for a single task
#[derive(Error, Debug)]
#[error("failed to dispose '{task}': {reason}")]
pub struct DisposalError {
    pub task: String,
    pub reason: String,
}

impl DisposalError {
    pub fn new(task: impl Into<String>, reason: impl ToString) -> Self {
        DisposalError {
            task: task.into(),
            reason: reason.to_string(),
        }
    }
}

/// Specialized result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Specialized result type for execution operations
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Specialized result type for disposal
pub type DisposalResult = std::result::Result<(), DisposalError>;
