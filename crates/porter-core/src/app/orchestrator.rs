//! QueueOrchestrator - アップロードキューの状態機械
//!
//! # 状態遷移
//! - (submit)            -> QUEUED
//! - QUEUED    -> UPLOADING  ping が最古の QUEUED を選ぶ
//! - UPLOADING -> DONE       uploader 成功
//! - UPLOADING -> QUEUED     uploader 失敗
//! - UPLOADING -> QUEUED     TTL 超過（reclaim）
//!
//! # single-flight
//! ping の「確認 → reclaim → 選択 → UPLOADING へ遷移」は `ping_lock` の中で行う。
//! uploader の await はロックの外なので、並行する ping は新しい UPLOADING 行を見て
//! 即座に `true` を返す。

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::observers::{EventSender, ObserverRegistry, spawn_dispatcher};
use super::retry::RetryPolicy;
use super::schedule::PingSchedule;
use crate::domain::{
    EventKind, NewUpload, PorterError, TaskEvent, TaskId, TaskStatus, UploadTask,
};
use crate::observability::QueueCounts;
use crate::ports::{Clock, StatusQuery, TaskStore, Uploader};

struct Inner {
    store: Arc<dyn TaskStore>,
    uploader: Arc<dyn Uploader>,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    retry_policy: RetryPolicy,
    observers: Arc<ObserverRegistry>,
    events: EventSender,
    schedule: PingSchedule,
    ping_lock: Mutex<()>,
}

/// Drives upload tasks through QUEUED -> UPLOADING -> DONE.
///
/// Cheap to clone; clones share the same state, observers and schedule.
/// Build one with [`OrchestratorBuilder`](super::OrchestratorBuilder).
#[derive(Clone)]
pub struct QueueOrchestrator {
    inner: Arc<Inner>,
}

impl QueueOrchestrator {
    /// Must be called inside a tokio runtime (spawns the event dispatcher).
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        uploader: Arc<dyn Uploader>,
        clock: Arc<dyn Clock>,
        ttl: TimeDelta,
        retry_policy: RetryPolicy,
    ) -> Self {
        let observers = Arc::new(ObserverRegistry::new());
        // the dispatcher exits on its own once `events` is dropped with the last clone
        let (events, _dispatcher) = spawn_dispatcher(observers.clone());

        Self {
            inner: Arc::new(Inner {
                store,
                uploader,
                clock,
                ttl,
                retry_policy,
                observers,
                events,
                schedule: PingSchedule::new(),
                ping_lock: Mutex::new(()),
            }),
        }
    }

    /// Enqueue a new task. Returns the stored row without waiting for the upload.
    pub async fn submit(&self, fields: NewUpload) -> Result<UploadTask, PorterError> {
        let task = self.inner.store.insert(fields).await?;
        tracing::info!(task_id = %task.id, key = %task.key, file = %task.file_name, "upload queued");
        Ok(task)
    }

    /// Advance the queue by at most one upload.
    ///
    /// Returns `Ok(true)` when an upload is already in flight, when the queue
    /// is idle, or when the upload started here succeeded; `Ok(false)` when
    /// that upload failed and the task went back to QUEUED. Storage errors
    /// are returned as-is; ping again later.
    pub async fn ping(&self) -> Result<bool, PorterError> {
        let claimed = {
            let _guard = self.inner.ping_lock.lock().await;
            self.claim_next().await?
        };

        match claimed {
            Some(task) => self.upload(task).await,
            None => Ok(true),
        }
    }

    /// Steps 1-4a of a ping: the check-then-act part that must not interleave.
    async fn claim_next(&self) -> Result<Option<UploadTask>, PorterError> {
        let store = &self.inner.store;
        let horizon = self
            .inner
            .clock
            .now()
            .checked_sub_signed(self.inner.ttl)
            .ok_or(PorterError::TtlOutOfRange(self.inner.ttl))?;

        let active = store
            .find_by_status(
                StatusQuery::new(TaskStatus::Uploading)
                    .newer_than(horizon)
                    .limit(1),
            )
            .await?;
        if let Some(task) = active.first() {
            tracing::debug!(task_id = %task.id, "upload already in flight");
            return Ok(None);
        }

        let stale = store
            .find_by_status(StatusQuery::new(TaskStatus::Uploading).older_than(horizon))
            .await?;
        for task in stale {
            tracing::warn!(
                task_id = %task.id,
                updated_at = %task.updated_at,
                "upload exceeded ttl; reclaiming"
            );
            self.transition(task.id, TaskStatus::Queued).await?;
        }

        let next = store
            .find_by_status(StatusQuery::new(TaskStatus::Queued).limit(1))
            .await?
            .into_iter()
            .next();
        let Some(next) = next else {
            tracing::debug!("queue idle");
            return Ok(None);
        };

        let task = self.transition(next.id, TaskStatus::Uploading).await?;
        Ok(Some(task))
    }

    async fn upload(&self, task: UploadTask) -> Result<bool, PorterError> {
        tracing::info!(task_id = %task.id, key = %task.key, "upload started");

        let succeeded = match self.inner.uploader.upload(&task.request()).await {
            Ok(()) => {
                self.transition(task.id, TaskStatus::Done).await?;
                tracing::info!(task_id = %task.id, "upload done");
                true
            }
            Err(err) => {
                tracing::warn!(task_id = %task.id, error = %err, "upload failed; requeued");
                self.transition(task.id, TaskStatus::Queued).await?;
                false
            }
        };

        self.schedule_ping(self.inner.retry_policy.next_delay(succeeded));
        Ok(succeeded)
    }

    /// Persist a status change, then hand the change event to the dispatcher.
    async fn transition(&self, id: TaskId, status: TaskStatus) -> Result<UploadTask, PorterError> {
        let task = self.inner.store.update_status(id, status).await?;
        self.inner.events.send(TaskEvent::status_change(task.clone()));
        Ok(task)
    }

    /// Keep-alive: refresh `updated_at` without changing the status.
    ///
    /// Transports call this while a long upload is still making progress so
    /// the TTL does not reclaim it.
    pub async fn touch(&self, id: TaskId) -> Result<UploadTask, PorterError> {
        self.inner.store.touch(id).await
    }

    /// Attach a callback to `task_id`. Callbacks run on the dispatcher, never
    /// inside the call that caused the event.
    pub fn register_observer<F>(&self, task_id: TaskId, observer: F)
    where
        F: Fn(&UploadTask, EventKind) + Send + Sync + 'static,
    {
        self.inner.observers.register(task_id, Arc::new(observer));
    }

    /// Re-attach to tasks that survived a restart.
    ///
    /// `visit` sees every persisted task (so it can register observers);
    /// afterwards one INIT event per task is queued for delivery. Returns the
    /// number of tasks visited.
    pub async fn recover<F>(&self, mut visit: F) -> Result<usize, PorterError>
    where
        F: FnMut(&UploadTask),
    {
        let tasks = self.inner.store.find_all().await?;
        for task in &tasks {
            visit(task);
        }

        let count = tasks.len();
        for task in tasks {
            self.inner.events.send(TaskEvent::init(task));
        }
        tracing::info!(count, "recovered persisted uploads");
        Ok(count)
    }

    /// Delete every task and drop all observers.
    pub async fn reset(&self) -> Result<usize, PorterError> {
        let deleted = self.inner.store.clear().await?;
        self.inner.observers.clear();
        self.inner.schedule.cancel();
        tracing::info!(deleted, "upload queue reset");
        Ok(deleted)
    }

    pub async fn find(&self, id: TaskId) -> Result<Option<UploadTask>, PorterError> {
        self.inner.store.find_by_id(id).await
    }

    /// Tasks with `status`, oldest `updated_at` first.
    pub async fn tasks(&self, status: TaskStatus) -> Result<Vec<UploadTask>, PorterError> {
        self.inner
            .store
            .find_by_status(StatusQuery::new(status))
            .await
    }

    pub async fn all_tasks(&self) -> Result<Vec<UploadTask>, PorterError> {
        self.inner.store.find_all().await
    }

    pub async fn counts(&self) -> Result<QueueCounts, PorterError> {
        let store = &self.inner.store;
        Ok(QueueCounts {
            queued: store.count(Some(TaskStatus::Queued)).await?,
            uploading: store.count(Some(TaskStatus::Uploading)).await?,
            done: store.count(Some(TaskStatus::Done)).await?,
        })
    }

    /// Ask the driver to ping as soon as possible (app resume, network change).
    pub fn request_ping(&self) {
        self.inner.schedule.request_now();
    }

    /// Ask the driver to ping after `delay`. The earliest pending request wins.
    pub fn schedule_ping(&self, delay: Duration) {
        self.inner.schedule.request_after(delay);
    }

    /// Deadline of the pending ping request, if any.
    pub fn next_ping_due(&self) -> Option<Instant> {
        self.inner.schedule.next_due()
    }

    pub(crate) fn schedule(&self) -> &PingSchedule {
        &self.inner.schedule
    }

    pub fn ttl(&self) -> TimeDelta {
        self.inner.ttl
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy
    }

    pub fn observer_count(&self, task_id: TaskId) -> usize {
        self.inner.observers.observer_count(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::OrchestratorBuilder;
    use crate::impls::{InMemoryTaskStore, ScriptedUploader};
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryTaskStore>,
        uploader: Arc<ScriptedUploader>,
        orchestrator: QueueOrchestrator,
    }

    fn fixture(uploader: ScriptedUploader) -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        let uploader = Arc::new(uploader);
        let orchestrator = OrchestratorBuilder::new()
            .store(store.clone())
            .uploader(uploader.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        Fixture {
            clock,
            store,
            uploader,
            orchestrator,
        }
    }

    fn upload(key: &str) -> NewUpload {
        NewUpload::new(key, format!("file:///tmp/{key}.jpg"), format!("{key}.jpg"))
    }

    #[tokio::test]
    async fn submit_stores_queued_row() {
        let f = fixture(ScriptedUploader::always_ok());

        let task = f.orchestrator.submit(upload("k1")).await.unwrap();

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(f.store.count(None).await.unwrap(), 1);
        assert!(f.uploader.calls().is_empty());
    }

    #[tokio::test]
    async fn ping_on_empty_queue_is_idle() {
        let f = fixture(ScriptedUploader::always_ok());

        assert!(f.orchestrator.ping().await.unwrap());
        assert!(f.uploader.calls().is_empty());
        assert_eq!(f.orchestrator.next_ping_due(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn success_schedules_prompt_ping() {
        let f = fixture(ScriptedUploader::always_ok());
        f.orchestrator.submit(upload("k1")).await.unwrap();

        let before = Instant::now();
        assert!(f.orchestrator.ping().await.unwrap());

        assert_eq!(
            f.orchestrator.next_ping_due(),
            Some(before + RetryPolicy::DEFAULT_DRAIN_DELAY)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_schedules_cooldown_ping() {
        let f = fixture(ScriptedUploader::always_fail("offline"));
        f.orchestrator.submit(upload("k1")).await.unwrap();

        let before = Instant::now();
        assert!(!f.orchestrator.ping().await.unwrap());

        assert_eq!(
            f.orchestrator.next_ping_due(),
            Some(before + RetryPolicy::DEFAULT_FAILURE_COOLDOWN)
        );
    }

    #[tokio::test]
    async fn uploader_receives_task_fields() {
        let f = fixture(ScriptedUploader::always_ok());
        f.orchestrator
            .submit(
                upload("k1")
                    .with_location(32.32, -120.12)
                    .with_quality(40)
                    .with_payload(r#"{"device":666}"#),
            )
            .await
            .unwrap();

        f.orchestrator.ping().await.unwrap();

        let calls = f.uploader.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image_uri, "file:///tmp/k1.jpg");
        assert_eq!(calls[0].file_name, "k1.jpg");
        assert_eq!(calls[0].latitude, Some(32.32));
        assert_eq!(calls[0].longitude, Some(-120.12));
        assert_eq!(calls[0].quality, 40);
        assert_eq!(calls[0].payload, r#"{"device":666}"#);
    }

    #[tokio::test]
    async fn horizon_outside_date_range_is_an_error() {
        let f = fixture(ScriptedUploader::always_ok());
        f.orchestrator.submit(upload("k1")).await.unwrap();
        f.clock.set(DateTime::<Utc>::MIN_UTC + TimeDelta::minutes(1));

        let err = f.orchestrator.ping().await.unwrap_err();

        assert!(matches!(err, PorterError::TtlOutOfRange(ttl) if ttl == TimeDelta::minutes(10)));
        assert!(f.uploader.calls().is_empty());
    }

    #[tokio::test]
    async fn touch_unknown_task_is_not_found() {
        let f = fixture(ScriptedUploader::always_ok());
        let err = f.orchestrator.touch(TaskId::new(77)).await.unwrap_err();
        assert!(matches!(err, PorterError::NotFound(id) if id == TaskId::new(77)));
    }

    #[tokio::test]
    async fn touch_only_moves_updated_at() {
        let f = fixture(ScriptedUploader::always_ok());
        let task = f.orchestrator.submit(upload("k1")).await.unwrap();

        for _ in 0..3 {
            f.clock.advance(TimeDelta::seconds(10));
            let touched = f.orchestrator.touch(task.id).await.unwrap();
            assert_eq!(touched.status, TaskStatus::Queued);
            assert_eq!(touched.updated_at, f.clock.now());
        }
    }

    #[tokio::test]
    async fn counts_reflect_statuses() {
        let f = fixture(ScriptedUploader::always_ok());
        f.orchestrator.submit(upload("a")).await.unwrap();
        f.orchestrator.submit(upload("b")).await.unwrap();
        f.orchestrator.ping().await.unwrap();

        let counts = f.orchestrator.counts().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.uploading, 0);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn reset_clears_rows_and_observers() {
        let f = fixture(ScriptedUploader::always_ok());
        let task = f.orchestrator.submit(upload("a")).await.unwrap();
        f.orchestrator.register_observer(task.id, |_, _| {});
        f.orchestrator.request_ping();

        assert_eq!(f.orchestrator.reset().await.unwrap(), 1);
        assert_eq!(f.store.count(None).await.unwrap(), 0);
        assert_eq!(f.orchestrator.observer_count(task.id), 0);
        assert_eq!(f.orchestrator.next_ping_due(), None);
    }
}
