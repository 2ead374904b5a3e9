//! OrchestratorBuilder - orchestrator の構築とワイヤリング
//!
//! # 方針
//! - 起動時検証（Fail-fast）: store / uploader の指定漏れや不正な TTL は build() で弾く
//! - clock は省略時 SystemClock。store と同じ clock を渡すこと

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use super::orchestrator::QueueOrchestrator;
use super::retry::RetryPolicy;
use crate::config::PorterConfig;
use crate::ports::{Clock, SystemClock, TaskStore, Uploader};

/// Wires a [`QueueOrchestrator`] from its ports.
///
/// # 使用例
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .store(Arc::new(SqliteTaskStore::open(&cfg.database_url).await?))
///     .uploader(Arc::new(MyUploader::new()))
///     .config(&cfg)
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn TaskStore>>,
    uploader: Option<Arc<dyn Uploader>>,
    clock: Option<Arc<dyn Clock>>,
    ttl: Duration,
    retry_policy: RetryPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no task store configured")]
    MissingStore,

    #[error("no uploader configured")]
    MissingUploader,

    #[error("invalid upload ttl: {0:?}")]
    InvalidTtl(Duration),
}

impl OrchestratorBuilder {
    /// Default time an upload may stay UPLOADING without progress.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

    pub fn new() -> Self {
        Self {
            store: None,
            uploader: None,
            clock: None,
            ttl: Self::DEFAULT_TTL,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Take TTL and retry delays from a loaded config.
    pub fn config(self, config: &PorterConfig) -> Self {
        self.ttl(config.ttl()).retry_policy(config.retry_policy())
    }

    /// Validate and build. Must run inside a tokio runtime.
    pub fn build(self) -> Result<QueueOrchestrator, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let uploader = self.uploader.ok_or(BuildError::MissingUploader)?;

        if self.ttl.is_zero() {
            return Err(BuildError::InvalidTtl(self.ttl));
        }
        let ttl = TimeDelta::from_std(self.ttl).map_err(|_| BuildError::InvalidTtl(self.ttl))?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        // ping computes `now - ttl`; it must stay inside chrono's date range
        if clock.now().checked_sub_signed(ttl).is_none() {
            return Err(BuildError::InvalidTtl(self.ttl));
        }

        tracing::debug!(
            ttl_ms = ttl.num_milliseconds(),
            drain_delay = ?self.retry_policy.drain_delay,
            failure_cooldown = ?self.retry_policy.failure_cooldown,
            "building upload orchestrator"
        );
        Ok(QueueOrchestrator::new(
            store,
            uploader,
            clock,
            ttl,
            self.retry_policy,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryTaskStore, ScriptedUploader};

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(InMemoryTaskStore::new())
    }

    fn uploader() -> Arc<dyn Uploader> {
        Arc::new(ScriptedUploader::always_ok())
    }

    #[tokio::test]
    async fn test_build_success_with_defaults() {
        let orchestrator = OrchestratorBuilder::new()
            .store(store())
            .uploader(uploader())
            .build()
            .unwrap();

        assert_eq!(orchestrator.ttl(), TimeDelta::minutes(10));
        assert_eq!(orchestrator.retry_policy(), RetryPolicy::default());
    }

    #[tokio::test]
    async fn test_build_missing_store() {
        let result = OrchestratorBuilder::new().uploader(uploader()).build();
        assert!(matches!(result, Err(BuildError::MissingStore)));
    }

    #[tokio::test]
    async fn test_build_missing_uploader() {
        let result = OrchestratorBuilder::new().store(store()).build();
        assert!(matches!(result, Err(BuildError::MissingUploader)));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_ttl() {
        let result = OrchestratorBuilder::new()
            .store(store())
            .uploader(uploader())
            .ttl(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(BuildError::InvalidTtl(d)) if d.is_zero()));
    }

    #[tokio::test]
    async fn test_build_rejects_ttl_beyond_date_range() {
        let huge = Duration::from_millis(u64::MAX / 1000);
        let result = OrchestratorBuilder::new()
            .store(store())
            .uploader(uploader())
            .ttl(huge)
            .build();
        assert!(matches!(result, Err(BuildError::InvalidTtl(d)) if d == huge));
    }

    #[tokio::test]
    async fn test_build_rejects_ttl_chrono_cannot_hold() {
        let result = OrchestratorBuilder::new()
            .store(store())
            .uploader(uploader())
            .ttl(Duration::MAX)
            .build();
        assert!(matches!(result, Err(BuildError::InvalidTtl(_))));
    }

    #[tokio::test]
    async fn test_build_applies_config() {
        let config = PorterConfig {
            ttl_ms: 30_000,
            failure_cooldown_ms: 5_000,
            drain_delay_ms: 10,
            ..PorterConfig::default()
        };

        let orchestrator = OrchestratorBuilder::new()
            .store(store())
            .uploader(uploader())
            .config(&config)
            .build()
            .unwrap();

        assert_eq!(orchestrator.ttl(), TimeDelta::seconds(30));
        assert_eq!(
            orchestrator.retry_policy(),
            RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(5))
        );
    }
}
