//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・組み込み用（再起動で消える）
//! - **SqliteTaskStore**: 本番用の永続ストア（クラッシュ後も復元可能）
//! - **ScriptedUploader**: 台本どおりに成功・失敗する Uploader（テスト・デモ用）

pub mod inmem_store;
pub mod scripted_uploader;
pub mod sqlite_store;

pub use self::inmem_store::InMemoryTaskStore;
pub use self::scripted_uploader::ScriptedUploader;
pub use self::sqlite_store::SqliteTaskStore;
