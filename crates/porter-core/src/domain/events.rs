//! Events - 観測者（observer）へ通知するイベント
//!
//! - `Init`: `recover()` が再起動後に残っていたタスクを再通知する
//! - `StatusChange`: orchestrator が状態遷移を確定した後に通知する

use std::fmt;

use serde::{Deserialize, Serialize};

use super::UploadTask;

/// Why an observer is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Init,
    StatusChange,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Init => "INIT",
            EventKind::StatusChange => "STATUS_CHANGE",
        })
    }
}

/// A task snapshot paired with the reason it is being delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub task: UploadTask,
    pub kind: EventKind,
}

impl TaskEvent {
    pub fn init(task: UploadTask) -> Self {
        Self {
            task,
            kind: EventKind::Init,
        }
    }

    pub fn status_change(task: UploadTask) -> Self {
        Self {
            task,
            kind: EventKind::StatusChange,
        }
    }
}
