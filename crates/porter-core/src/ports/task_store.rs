//! TaskStore port - アップロードタスクの永続化（source of truth）
//!
//! TaskStore は純粋な CRUD と述語クエリのみを提供し、状態機械の判断は持たない。
//!
//! # 設計原則
//! - 状態遷移は orchestrator からのみ呼ばれる（外部から status を直接書かない）
//! - `update_status` / `touch` は必ず `updated_at` を現在時刻に更新する
//! - 複数ステップの操作は 1 トランザクション内で完結させる

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{NewUpload, PorterError, TaskId, TaskStatus, UploadTask};

/// Filter for [`TaskStore::find_by_status`].
///
/// Bounds split the timeline at a point `t`:
/// - `older_than(t)` keeps rows with `updated_at <= t`
/// - `newer_than(t)` keeps rows with `updated_at > t`
///
/// Results are ordered by `updated_at` ascending, then by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusQuery {
    pub status: TaskStatus,
    pub older_than: Option<DateTime<Utc>>,
    pub newer_than: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl StatusQuery {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            older_than: None,
            newer_than: None,
            limit: None,
        }
    }

    pub fn older_than(mut self, at: DateTime<Utc>) -> Self {
        self.older_than = Some(at);
        self
    }

    pub fn newer_than(mut self, at: DateTime<Utc>) -> Self {
        self.newer_than = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Does `task` satisfy the status and time bounds (ignores `limit`)?
    pub fn matches(&self, task: &UploadTask) -> bool {
        if task.status != self.status {
            return false;
        }
        if let Some(at) = self.older_than {
            if task.updated_at > at {
                return false;
            }
        }
        if let Some(at) = self.newer_than {
            if task.updated_at <= at {
                return false;
            }
        }
        true
    }
}

/// Durable, queryable persistence for upload tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a new task as QUEUED, stamped now, with a freshly allocated id.
    async fn insert(&self, fields: NewUpload) -> Result<UploadTask, PorterError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<UploadTask>, PorterError>;

    async fn find_by_status(&self, query: StatusQuery) -> Result<Vec<UploadTask>, PorterError>;

    /// Every row, ordered by id.
    async fn find_all(&self) -> Result<Vec<UploadTask>, PorterError>;

    /// Set the status and refresh `updated_at`; returns the post-update row.
    async fn update_status(&self, id: TaskId, status: TaskStatus)
    -> Result<UploadTask, PorterError>;

    /// Refresh `updated_at` without changing the status.
    async fn touch(&self, id: TaskId) -> Result<UploadTask, PorterError>;

    /// Total rows, or rows with `status`.
    async fn count(&self, status: Option<TaskStatus>) -> Result<usize, PorterError>;

    /// Delete every row; returns how many were deleted.
    async fn clear(&self) -> Result<usize, PorterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;

    fn task_at(status: TaskStatus, updated_at: DateTime<Utc>) -> UploadTask {
        let mut task = UploadTask::queued(
            TaskId::new(1),
            NewUpload::new("k", "file:///a.jpg", "a.jpg"),
            updated_at,
        );
        task.status = status;
        task
    }

    fn pivot() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[rstest]
    #[case::before(-1, true, false)]
    #[case::exactly(0, true, false)]
    #[case::after(1, false, true)]
    fn bounds_partition_the_timeline(
        #[case] offset_ms: i64,
        #[case] older: bool,
        #[case] newer: bool,
    ) {
        let task = task_at(
            TaskStatus::Uploading,
            pivot() + TimeDelta::milliseconds(offset_ms),
        );

        let q = StatusQuery::new(TaskStatus::Uploading);
        assert_eq!(q.older_than(pivot()).matches(&task), older);
        assert_eq!(q.newer_than(pivot()).matches(&task), newer);
    }

    #[test]
    fn status_must_match_exactly() {
        let task = task_at(TaskStatus::Queued, pivot());
        assert!(StatusQuery::new(TaskStatus::Queued).matches(&task));
        assert!(!StatusQuery::new(TaskStatus::Uploading).matches(&task));
        assert!(!StatusQuery::new(TaskStatus::Done).matches(&task));
    }

    #[test]
    fn window_with_both_bounds() {
        let q = StatusQuery::new(TaskStatus::Uploading)
            .newer_than(pivot() - TimeDelta::minutes(10))
            .older_than(pivot());

        assert!(q.matches(&task_at(TaskStatus::Uploading, pivot() - TimeDelta::minutes(5))));
        assert!(!q.matches(&task_at(TaskStatus::Uploading, pivot() - TimeDelta::minutes(10))));
        assert!(!q.matches(&task_at(TaskStatus::Uploading, pivot() + TimeDelta::seconds(1))));
    }
}
