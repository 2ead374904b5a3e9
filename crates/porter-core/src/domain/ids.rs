//! Domain identifiers.
//!
//! # TaskId
//! タスク ID はストアが採番する単調増加の整数です。
//! - プロセス内で一意（SQLite では AUTOINCREMENT、in-memory ではカウンタ）
//! - 一度払い出した値は `clear()` 後も再利用しない
//! - 呼び出し側の相関キー（`key`）とは別物

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an upload task (one row in the `uploads` table).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }

    /// The id that follows this one in allocation order.
    pub(crate) const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}
