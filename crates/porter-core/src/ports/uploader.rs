//! Uploader port - 実際のファイル転送（外部協力者）
//!
//! コアは uploader を「成功か失敗を返す不透明な非同期処理」として扱う。
//! 転送フォーマットやプロトコルは実装側の責務。

use async_trait::async_trait;

use crate::domain::{UploadError, UploadRequest};

/// Transfers one asset to its destination.
///
/// Called exactly once per QUEUED -> UPLOADING transition. The call may take
/// arbitrarily long; the orchestrator's TTL reclaims the queue slot if it
/// never returns.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<(), UploadError>;
}
