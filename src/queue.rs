//! Dispatch queue — FIFO hand-off of job ids between submission and workers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// In-process FIFO queue of job identifiers with bounded blocking pop.
///
/// Re-queued (retrying) jobs are appended at the tail like everything else;
/// there is no ordering guarantee between a job's retry attempts and other
/// jobs' first attempts.
pub struct DispatchQueue {
    name: String,
    entries: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl DispatchQueue {
    /// Create a new empty queue.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        })
    }

    /// The queue's label, used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push a job id onto the tail.
    pub async fn push(&self, job_id: Uuid) {
        {
            let mut entries = self.entries.lock().await;
            entries.push_back(job_id);
        }
        debug!(queue = %self.name, job_id = %job_id, "Job enqueued");
        self.notify.notify_one();
    }

    /// Pop from the head, waiting up to `wait` for an entry to arrive.
    ///
    /// Returns `None` when the wait expires — the caller's cooperative
    /// cancellation point.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<Uuid> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut entries = self.entries.lock().await;
                if let Some(job_id) = entries.pop_front() {
                    // Wake the next waiter if more work is queued; a stored
                    // notify permit covers at most one consumer.
                    if !entries.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(job_id);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            if tokio::time::timeout(deadline - now, self.notify.notified())
                .await
                .is_err()
            {
                return self.entries.lock().await.pop_front();
            }
        }
    }

    /// Current queue depth.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Check if the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
