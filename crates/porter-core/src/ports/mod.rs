//! Ports - 抽象化レイヤー
//!
//! 外部の協力者（永続化エンジン、ネットワーク転送、時計）へのインターフェース。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - Uploader は不透明な非同期処理（成功 / 失敗のみ）
//! - Clock は差し替え可能（TTL のテスト容易性）

pub mod clock;
pub mod task_store;
pub mod uploader;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::task_store::{StatusQuery, TaskStore};
pub use self::uploader::Uploader;
