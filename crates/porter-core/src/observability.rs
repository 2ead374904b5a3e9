use serde::{Deserialize, Serialize};

/// Number of tasks per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub uploading: usize,
    pub done: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.queued + self.uploading + self.done
    }

    /// Tasks that still need an upload.
    pub fn pending(&self) -> usize {
        self.queued + self.uploading
    }
}
