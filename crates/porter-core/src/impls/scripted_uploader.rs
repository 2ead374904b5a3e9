//! ScriptedUploader - 結果を台本どおりに返す Uploader
//!
//! テストやデモ用。呼び出されたリクエストを記録し、台本（outcomes）を
//! 先頭から順に返す。台本が尽きたら `fallback` を返し続ける。

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::{UploadError, UploadRequest};
use crate::ports::Uploader;

#[derive(Debug)]
struct Script {
    outcomes: VecDeque<Result<(), UploadError>>,
    fallback: Result<(), UploadError>,
    calls: Vec<UploadRequest>,
}

/// Uploader that replays a fixed list of outcomes and records every request.
#[derive(Debug)]
pub struct ScriptedUploader {
    script: Mutex<Script>,
}

impl ScriptedUploader {
    pub fn new(
        outcomes: impl IntoIterator<Item = Result<(), UploadError>>,
        fallback: Result<(), UploadError>,
    ) -> Self {
        Self {
            script: Mutex::new(Script {
                outcomes: outcomes.into_iter().collect(),
                fallback,
                calls: Vec::new(),
            }),
        }
    }

    pub fn always_ok() -> Self {
        Self::new([], Ok(()))
    }

    pub fn always_fail(reason: impl Into<String>) -> Self {
        Self::new([], Err(UploadError::new(reason)))
    }

    /// Fail `failures` times, then succeed.
    pub fn fail_then_ok(failures: usize, reason: impl Into<String>) -> Self {
        let err = UploadError::new(reason);
        Self::new(std::iter::repeat_n(Err(err), failures), Ok(()))
    }

    /// Requests received so far, in call order.
    pub fn calls(&self) -> Vec<UploadRequest> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .len()
    }
}

#[async_trait]
impl Uploader for ScriptedUploader {
    async fn upload(&self, request: &UploadRequest) -> Result<(), UploadError> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        script.calls.push(request.clone());
        match script.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => script.fallback.clone(),
        }
    }
}
