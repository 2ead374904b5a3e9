//! Retry policy: decides when the next ping should run.

use std::time::Duration;

/// When to ping again after an upload attempt.
///
/// There is no attempt limit: a failing task is retried until it succeeds
/// or the queue is reset. Failed tasks go to the back of the queue because
/// the requeue refreshes `updated_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the next ping after a successful upload (drain the queue promptly).
    pub drain_delay: Duration,

    /// Delay before the next ping after a failed upload (avoid a tight failure loop).
    pub failure_cooldown: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_DRAIN_DELAY: Duration = Duration::from_millis(1);
    pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

    pub fn new(drain_delay: Duration, failure_cooldown: Duration) -> Self {
        Self {
            drain_delay,
            failure_cooldown,
        }
    }

    /// Delay before the next ping, given whether the last upload succeeded.
    pub fn next_delay(&self, succeeded: bool) -> Duration {
        if succeeded {
            self.drain_delay
        } else {
            self.failure_cooldown
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DRAIN_DELAY, Self::DEFAULT_FAILURE_COOLDOWN)
    }
}
