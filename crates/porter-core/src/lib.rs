//! porter-core
//!
//! Persistent, single-flight upload queue.
//!
//! 画像アップロードを永続キューに積み、一度に一件だけ外部 uploader へ流す。
//! クラッシュや再起動をまたいでもタスクは失われない（少なくとも一回の配送）。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, Uploader, Clock）
//! - **impls**: 実装（InMemoryTaskStore, SqliteTaskStore, ScriptedUploader）
//! - **app**: アプリケーションロジック（builder, orchestrator, driver, observers）
//! - **config**: 環境変数からの設定（`PORTER_*`）
//! - **observability**: ステータス別の件数ビュー

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{BuildError, OrchestratorBuilder, QueueDriver, QueueOrchestrator, RetryPolicy};
pub use config::PorterConfig;
pub use domain::{
    EventKind, NewUpload, PorterError, TaskId, TaskStatus, UploadError, UploadRequest, UploadTask,
};
pub use ports::{Clock, TaskStore, Uploader};
