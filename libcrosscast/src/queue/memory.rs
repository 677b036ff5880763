//! In-process queue that records jobs instead of delivering them
//!
//! Available for all builds (not just tests) so integration tests and local
//! runs can drive the dispatcher by hand.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{DelayedQueue, QueueJob};
use crate::error::{QueueError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedJob {
    pub id: String,
    pub job: QueueJob,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    jobs: Arc<Mutex<Vec<RecordedJob>>>,
    fail_enqueue: Arc<Mutex<Option<String>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following enqueue fail with `reason`.
    pub fn fail_with(&self, reason: &str) {
        if let Ok(mut guard) = self.fail_enqueue.lock() {
            *guard = Some(reason.to_string());
        }
    }

    pub fn jobs(&self) -> Vec<RecordedJob> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }

    /// Jobs sent to `destination`, oldest first.
    pub fn jobs_for(&self, destination: &str) -> Vec<RecordedJob> {
        self.jobs()
            .into_iter()
            .filter(|j| j.job.destination == destination)
            .collect()
    }

    pub fn last_job(&self) -> Option<RecordedJob> {
        self.jobs().pop()
    }
}

#[async_trait]
impl DelayedQueue for MemoryQueue {
    async fn enqueue(&self, job: QueueJob) -> Result<String> {
        if let Some(reason) = self.fail_enqueue.lock().ok().and_then(|g| g.clone()) {
            return Err(QueueError::Enqueue(reason).into());
        }

        let mut jobs = self
            .jobs
            .lock()
            .map_err(|_| QueueError::Enqueue("memory queue poisoned".to_string()))?;
        let id = format!("mem-{}", jobs.len() + 1);
        jobs.push(RecordedJob {
            id: id.clone(),
            job,
        });
        Ok(id)
    }
}
