//! Error types for Chartpilot
//!
//! All modules use `ChartpilotResult<T>` as their return type. A chart that
//! fails to deploy is not an error at this level: it is a `DeployResult`
//! with a failed status. Errors here change the caller's control flow.

use crate::deploy::CancelCause;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Chartpilot operations
pub type ChartpilotResult<T> = Result<T, ChartpilotError>;

/// All errors that can occur in Chartpilot
#[derive(Error, Debug)]
pub enum ChartpilotError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("Invalid deployment plan {path}: {reason}")]
    PlanInvalid { path: PathBuf, reason: String },

    // Lock errors
    #[error("Operation already in progress for release {namespace}/{release}: {held_by} (requested: {operation})")]
    OperationInProgress {
        release: String,
        namespace: String,
        operation: String,
        held_by: String,
    },

    // Worker pool errors
    #[error("Worker pool is shut down, job for {0} rejected")]
    PoolClosed(String),

    #[error("Worker pool has not been started, job for {0} rejected")]
    PoolNotStarted(String),

    // Group errors
    #[error("Deployment group {group} {cause}")]
    GroupCancelled { group: String, cause: CancelCause },

    #[error("{failed} chart(s) failed to deploy")]
    DeploymentFailed { failed: usize },

    // Deploy command errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Cache errors
    #[error("Cache error at {path}: {reason}")]
    CacheIo { path: PathBuf, reason: String },

    // Dependency monitoring errors
    #[error("Dependency check failed for {dependency}: {reason}")]
    ProbeFailed { dependency: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChartpilotError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid option error
    pub fn invalid_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    ///
    /// Lock contention is expected under concurrent use; the caller may try
    /// again once the current holder finishes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OperationInProgress { .. })
    }

    /// Whether the error comes from cancellation or a timeout
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::GroupCancelled { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::OperationInProgress { .. } => {
                Some("Wait for the running operation to finish, then retry")
            }
            Self::ConfigNotFound(_) => Some("Run: chartpilot config init"),
            Self::GroupCancelled { .. } => {
                Some("Raise deploy.group_timeout_secs or rerun the remaining charts")
            }
            Self::CommandFailed { .. } => Some("Check that the deploy command is on PATH"),
            Self::DeploymentFailed { .. } => {
                Some("See the per-chart errors above, rerun with -v for command output")
            }
            _ => None,
        }
    }
}
