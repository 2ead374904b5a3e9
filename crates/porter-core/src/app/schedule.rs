//! PingSchedule - 「あとで ping する」要求の受け皿
//!
//! upload の完了時や外部トリガー（アプリ復帰、ネットワーク変化）が
//! 次の ping を要求する。要求は合流（coalesce）し、最も早い期限だけが残る。
//! 実際に ping を回すのは [`QueueDriver`](super::QueueDriver) のループ。

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Stand-in deadline for delays `Instant` cannot represent (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Earliest pending ping deadline plus a wake-up for the driver loop.
#[derive(Debug, Default)]
pub struct PingSchedule {
    next: Mutex<Option<Instant>>,
    notify: Notify,
}

impl PingSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a ping `delay` from now. An earlier pending request wins.
    pub fn request_after(&self, delay: Duration) {
        let now = Instant::now();
        let at = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            match *next {
                Some(existing) if existing <= at => return,
                _ => *next = Some(at),
            }
        }
        // notify outside the lock; a stored permit covers a driver that is not waiting yet
        self.notify.notify_one();
    }

    pub fn request_now(&self) {
        self.request_after(Duration::ZERO);
    }

    /// The pending deadline, if any.
    pub fn next_due(&self) -> Option<Instant> {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop any pending request.
    pub fn cancel(&self) {
        self.next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Consume the pending request if its deadline has passed.
    fn take_due(&self, now: Instant) -> Result<(), Option<Instant>> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        match *next {
            Some(at) if at <= now => {
                *next = None;
                Ok(())
            }
            pending => Err(pending),
        }
    }

    /// Wait until a requested ping is due, then consume the request.
    pub async fn wait_due(&self) {
        loop {
            match self.take_due(Instant::now()) {
                Ok(()) => return,
                Err(Some(at)) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                Err(None) => self.notify.notified().await,
            }
        }
    }
}
