//! Data models for sweenv
//!
//! Result types handed back to callers of a container session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one command executed in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Combined stdout and stderr, lossily decoded
    pub output: String,

    /// Exit code of the exec session (the command's exit code)
    pub returncode: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.returncode == 0
    }
}

/// Snapshot of a started session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Name given to the container at `run`
    pub container_name: String,

    /// Runtime-assigned container id
    pub container_id: Option<String>,

    /// Image reference actually passed to `run`
    pub image: Option<String>,

    /// When the container was started
    pub started_at: Option<DateTime<Utc>>,
}
