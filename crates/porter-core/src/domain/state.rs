//! Task status for the upload queue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upload task status (closed set).
///
/// State transitions:
/// - Queued -> Uploading -> Done
/// - Queued -> Uploading -> Queued (upload failed, or reclaimed after the TTL)
///
/// Only the orchestrator moves a task between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for its turn.
    Queued,

    /// Handed to the uploader.
    Uploading,

    /// Uploaded successfully.
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Queued, TaskStatus::Uploading, TaskStatus::Done];

    /// Storage representation (the `state` column).
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::Uploading => "UPLOADING",
            TaskStatus::Done => "DONE",
        }
    }

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "UPLOADING" => Ok(TaskStatus::Uploading),
            "DONE" => Ok(TaskStatus::Done),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}
