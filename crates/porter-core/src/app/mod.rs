//! App - アプリケーション層
//!
//! ports を組み合わせてアップロードキューのロジックを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: orchestrator の構築とワイヤリング
//! - **QueueOrchestrator**: submit / ping / touch / recover / reset
//! - **QueueDriver**: 期限が来た ping を回すバックグラウンドループ
//! - **PingSchedule**: ping 要求の合流（最も早い期限が勝つ）
//! - **ObserverRegistry**: タスクごとのコールバックと非同期配送
//! - **RetryPolicy**: 成功後・失敗後の次の ping までの遅延

pub mod builder;
pub mod driver;
pub mod observers;
pub mod orchestrator;
pub mod retry;
pub mod schedule;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::driver::QueueDriver;
pub use self::observers::{Observer, ObserverRegistry};
pub use self::orchestrator::QueueOrchestrator;
pub use self::retry::RetryPolicy;
pub use self::schedule::PingSchedule;
