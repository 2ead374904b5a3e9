//! QueueDriver - ping を回し続けるバックグラウンドループ
//!
//! - PingSchedule の期限が来たら ping する（成功後は即、失敗後は cool-down 後）
//! - 外部トリガー（アプリ復帰、ネットワーク変化）は `trigger()` で即時 ping を要求
//! - 定期ポーリングは `poll()`。予約済みの ping（cool-down 中など）があれば何もしない
//! - shutdown は watch チャネルで協調的に行う。実行中の upload は中断しない

use std::sync::Arc;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use super::orchestrator::QueueOrchestrator;

/// Handle to the background ping loop.
/// - `shutdown_tx` を drop してもループは止まる
/// - `shutdown_and_join()` で終了を待てる
pub struct QueueDriver {
    orchestrator: QueueOrchestrator,
    shutdown_tx: watch::Sender<bool>,
    poll: Arc<Notify>,
    join: JoinHandle<()>,
}

impl QueueDriver {
    /// Spawn the loop and request an immediate first ping, so rows persisted
    /// by an earlier process start draining right away.
    pub fn spawn(orchestrator: QueueOrchestrator) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poll = Arc::new(Notify::new());

        let join = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let poll = poll.clone();
            async move { drive(orchestrator, &poll, &mut shutdown_rx).await }
        });
        orchestrator.request_ping();

        Self {
            orchestrator,
            shutdown_tx,
            poll,
            join,
        }
    }

    /// Ask for a ping as soon as possible.
    pub fn trigger(&self) {
        self.orchestrator.request_ping();
    }

    /// Ping now unless a ping is already scheduled.
    ///
    /// Unlike [`trigger`](Self::trigger) this never shortens a pending
    /// failure cool-down. A poll that arrives mid-upload is checked once the
    /// upload has scheduled its follow-up.
    pub fn poll(&self) {
        self.poll.notify_one();
    }

    /// Stop taking new pings. An upload already running is left to finish.
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(err) = self.join.await {
            tracing::error!(error = %err, "queue driver task panicked");
        }
    }
}

async fn drive(
    orchestrator: QueueOrchestrator,
    poll: &Notify,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    tracing::info!("queue driver started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped: nobody can stop us any more, so stop now
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = orchestrator.schedule().wait_due() => {}
            _ = poll.notified() => {
                if let Some(due) = orchestrator.next_ping_due() {
                    tracing::trace!(?due, "poll skipped; ping already scheduled");
                    continue;
                }
            }
        }

        match orchestrator.ping().await {
            Ok(true) => tracing::trace!("ping finished"),
            Ok(false) => tracing::debug!("ping finished with a failed upload"),
            Err(err) => {
                let cooldown = orchestrator.retry_policy().failure_cooldown;
                tracing::error!(
                    error = %err,
                    kind = ?err.kind(),
                    retry_in = ?cooldown,
                    "ping failed"
                );
                orchestrator.schedule_ping(cooldown);
            }
        }
    }
    tracing::info!("queue driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::OrchestratorBuilder;
    use crate::domain::{NewUpload, TaskStatus};
    use crate::impls::{InMemoryTaskStore, ScriptedUploader};
    use std::time::Duration;

    fn orchestrator(uploader: Arc<ScriptedUploader>) -> QueueOrchestrator {
        OrchestratorBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .uploader(uploader)
            .build()
            .unwrap()
    }

    async fn submit(orchestrator: &QueueOrchestrator, key: &str) {
        orchestrator
            .submit(NewUpload::new(key, format!("file:///{key}.jpg"), format!("{key}.jpg")))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queue_without_external_pings() {
        let uploader = Arc::new(ScriptedUploader::always_ok());
        let orchestrator = orchestrator(uploader.clone());
        for key in ["a", "b", "c"] {
            submit(&orchestrator, key).await;
        }

        let driver = QueueDriver::spawn(orchestrator.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(uploader.call_count(), 3);
        assert_eq!(orchestrator.tasks(TaskStatus::Done).await.unwrap().len(), 3);
        driver.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failure_waits_for_cooldown_before_retrying() {
        let uploader = Arc::new(ScriptedUploader::fail_then_ok(1, "offline"));
        let orchestrator = orchestrator(uploader.clone());
        submit(&orchestrator, "a").await;

        let driver = QueueDriver::spawn(orchestrator.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(uploader.call_count(), 1);
        assert_eq!(orchestrator.tasks(TaskStatus::Queued).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(uploader.call_count(), 2);
        assert_eq!(orchestrator.tasks(TaskStatus::Done).await.unwrap().len(), 1);

        driver.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_pings_idle_queue_immediately() {
        let uploader = Arc::new(ScriptedUploader::always_ok());
        let orchestrator = orchestrator(uploader.clone());
        let driver = QueueDriver::spawn(orchestrator.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        submit(&orchestrator, "late").await;
        assert_eq!(uploader.call_count(), 0);

        driver.trigger();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(uploader.call_count(), 1);

        driver.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polling_does_not_cut_failure_cooldown_short() {
        let uploader = Arc::new(ScriptedUploader::fail_then_ok(1, "offline"));
        let orchestrator = orchestrator(uploader.clone());
        submit(&orchestrator, "a").await;

        let driver = QueueDriver::spawn(orchestrator.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(uploader.call_count(), 1);

        for _ in 0..10 {
            driver.poll();
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        assert_eq!(uploader.call_count(), 1);
        assert_eq!(orchestrator.tasks(TaskStatus::Queued).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(uploader.call_count(), 2);
        driver.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn poll_pings_idle_queue() {
        let uploader = Arc::new(ScriptedUploader::always_ok());
        let orchestrator = orchestrator(uploader.clone());
        let driver = QueueDriver::spawn(orchestrator.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        // written by another process: no request_ping of its own
        submit(&orchestrator, "elsewhere").await;
        driver.poll();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(uploader.call_count(), 1);
        assert_eq!(orchestrator.tasks(TaskStatus::Done).await.unwrap().len(), 1);
        driver.shutdown_and_join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let uploader = Arc::new(ScriptedUploader::always_ok());
        let orchestrator = orchestrator(uploader.clone());
        let driver = QueueDriver::spawn(orchestrator.clone());

        driver.shutdown_and_join().await;

        submit(&orchestrator, "after").await;
        orchestrator.request_ping();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(uploader.call_count(), 0);
    }
}
