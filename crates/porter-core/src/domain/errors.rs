//! Errors - エラー型と分類
//!
//! - Storage: 永続化層の失敗。コアでは再試行せず呼び出し側へ返す
//! - NotFound: 存在しない task id を参照した
//! - Upload: uploader の失敗。requeue + 遅延 ping で自動回復する
//! - TtlOutOfRange: `now - ttl` が表現できる日時の範囲を外れた（設定ミス）

use chrono::TimeDelta;
use thiserror::Error;

use super::TaskId;
use super::state::ParseStatusError;

/// ErrorKind は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retrying later may succeed.
    Transient,
    /// Retrying the same call cannot succeed.
    Permanent,
    /// The storage medium failed.
    Infrastructure,
}

/// Failure reported by an [`Uploader`](crate::ports::Uploader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("upload failed: {reason}")]
pub struct UploadError {
    pub reason: String,
}

impl UploadError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PorterError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("ttl of {0} puts the reclaim horizon outside the supported date range")]
    TtlOutOfRange(TimeDelta),
}

impl PorterError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        PorterError::Storage(err.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PorterError::Storage(_) => ErrorKind::Infrastructure,
            PorterError::NotFound(_) => ErrorKind::Permanent,
            PorterError::Upload(_) => ErrorKind::Transient,
            PorterError::TtlOutOfRange(_) => ErrorKind::Permanent,
        }
    }
}

// A status string we cannot read back means the row is corrupt.
impl From<ParseStatusError> for PorterError {
    fn from(err: ParseStatusError) -> Self {
        PorterError::storage(err)
    }
}
