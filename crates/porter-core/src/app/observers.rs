//! Observers - タスクごとのコールバック登録と非同期配送
//!
//! # 設計
//! - 登録簿は orchestrator インスタンスごと（プロセス全体のグローバルではない）
//! - 1 タスクに複数の observer を登録でき、登録順に呼ばれる
//! - 通知はチャネル経由で専用タスクが配送する。遷移を起こした呼び出しの中で
//!   直接呼ぶことはない（orchestrator への再入を避ける）
//! - observer のリストは配送時に引くので、イベント送出後に登録された observer も受け取る
//! - observer の panic は捕捉してログに残す。他の observer と後続イベントの配送は続く

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::{EventKind, TaskEvent, TaskId, UploadTask};

/// Callback invoked with `(task, event_kind)`.
pub type Observer = Arc<dyn Fn(&UploadTask, EventKind) + Send + Sync>;

/// Ordered observer lists keyed by task id.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<HashMap<TaskId, Vec<Observer>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: TaskId, observer: Observer) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task_id)
            .or_default()
            .push(observer);
    }

    /// Snapshot of the observers for `task_id`, in registration order.
    pub fn observers_for(&self, task_id: TaskId) -> Vec<Observer> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn observer_count(&self, task_id: TaskId) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Call every observer of the event's task.
    ///
    /// The lock is released before any callback runs, so a callback may register more observers.
    pub fn fire(&self, event: &TaskEvent) {
        for observer in self.observers_for(event.task.id) {
            if catch_unwind(AssertUnwindSafe(|| observer(&event.task, event.kind))).is_err() {
                tracing::error!(
                    task_id = %event.task.id,
                    kind = %event.kind,
                    "observer panicked"
                );
            }
        }
    }
}

/// Sending half of the notification hand-off.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventSender {
    /// Queue an event for delivery. Never calls observers directly.
    pub fn send(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("event dispatcher stopped; dropping notification");
        }
    }
}

/// Spawn the dispatcher task. It stops once every [`EventSender`] is dropped.
///
/// Each event is delivered on its own scheduling turn.
pub fn spawn_dispatcher(registry: Arc<ObserverRegistry>) -> (EventSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<TaskEvent>();
    let join = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tokio::task::yield_now().await;
            tracing::trace!(task_id = %event.task.id, kind = %event.kind, "notifying observers");
            registry.fire(&event);
        }
    });
    (EventSender { tx }, join)
}
