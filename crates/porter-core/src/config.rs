use std::time::Duration;

use serde::Deserialize;

use crate::app::RetryPolicy;

/// Environment prefix for every setting (`PORTER_DATABASE_URL`, `PORTER_TTL_MS`, ...).
pub const ENV_PREFIX: &str = "PORTER_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PorterConfig {
    /// SQLite connection string (e.g., "sqlite://porter.db")
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// How long an upload may stay UPLOADING without a touch before it is reclaimed
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Delay before the next ping after a failed upload
    #[serde(default = "default_failure_cooldown_ms")]
    pub failure_cooldown_ms: u64,

    /// Delay before the next ping after a successful upload
    #[serde(default = "default_drain_delay_ms")]
    pub drain_delay_ms: u64,
}

fn default_database_url() -> String {
    "sqlite://porter.db".to_string()
}

fn default_ttl_ms() -> u64 {
    600_000
}

fn default_failure_cooldown_ms() -> u64 {
    60_000
}

fn default_drain_delay_ms() -> u64 {
    1
}

impl PorterConfig {
    /// Load from `PORTER_*` variables, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::prefixed(ENV_PREFIX).from_env()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.drain_delay(), self.failure_cooldown())
    }
}

impl Default for PorterConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            ttl_ms: default_ttl_ms(),
            failure_cooldown_ms: default_failure_cooldown_ms(),
            drain_delay_ms: default_drain_delay_ms(),
        }
    }
}
