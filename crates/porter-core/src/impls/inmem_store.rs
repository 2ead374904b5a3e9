//! In-memory task store.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewUpload, PorterError, TaskId, TaskStatus, UploadTask};
use crate::ports::{Clock, StatusQuery, SystemClock, TaskStore};

/// In-memory store state.
struct InMemoryStoreState {
    /// All rows, keyed (and therefore iterated) by id.
    records: BTreeMap<TaskId, UploadTask>,

    /// Next id to assign. Never rewound, not even by `clear`.
    next_id: TaskId,
}

impl InMemoryStoreState {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_id: TaskId::new(1),
        }
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn record_mut(&mut self, id: TaskId) -> Result<&mut UploadTask, PorterError> {
        self.records.get_mut(&id).ok_or(PorterError::NotFound(id))
    }
}

/// Process-local [`TaskStore`]; nothing survives a restart.
///
/// Every operation runs under a single lock, so each one is atomic with
/// respect to concurrent callers.
pub struct InMemoryTaskStore {
    state: Mutex<InMemoryStoreState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(InMemoryStoreState::new()),
            clock,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, fields: NewUpload) -> Result<UploadTask, PorterError> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let task = UploadTask::queued(id, fields, self.clock.now());
        state.records.insert(id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<UploadTask>, PorterError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn find_by_status(&self, query: StatusQuery) -> Result<Vec<UploadTask>, PorterError> {
        let state = self.state.lock().await;
        let mut found: Vec<UploadTask> = state
            .records
            .values()
            .filter(|task| query.matches(task))
            .cloned()
            .collect();

        // records are already in id order, and sort_by_key is stable
        found.sort_by_key(|task| task.updated_at);
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn find_all(&self) -> Result<Vec<UploadTask>, PorterError> {
        let state = self.state.lock().await;
        Ok(state.records.values().cloned().collect())
    }

    async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
    ) -> Result<UploadTask, PorterError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        record.status = status;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn touch(&self, id: TaskId) -> Result<UploadTask, PorterError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn count(&self, status: Option<TaskStatus>) -> Result<usize, PorterError> {
        let state = self.state.lock().await;
        Ok(match status {
            Some(status) => state
                .records
                .values()
                .filter(|task| task.status == status)
                .count(),
            None => state.records.len(),
        })
    }

    async fn clear(&self) -> Result<usize, PorterError> {
        let mut state = self.state.lock().await;
        let deleted = state.records.len();
        state.records.clear();
        Ok(deleted)
    }
}
