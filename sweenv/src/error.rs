//! Error types for sandbox environments

use std::time::Duration;

use thiserror::Error;

/// Failure of a single runtime binary invocation
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("command timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// Environment error types
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Container not started")]
    NotStarted,

    #[error("Container {0} has already been released")]
    Released(String),

    #[error("Failed to start container from {image}: {stderr}")]
    StartFailed { image: String, stderr: String },

    #[error("Container start timed out after {}s", .0.as_secs())]
    StartTimedOut(Duration),

    #[error("Command timed out after {}s", .timeout.as_secs())]
    ExecTimedOut { timeout: Duration },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl EnvironmentError {
    /// Whether this error is an exec or start timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EnvironmentError::ExecTimedOut { .. } | EnvironmentError::StartTimedOut(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EnvironmentError>;
