//! `JobStore` trait — single async interface for durable job records.
//!
//! Every exit from RUNNING is a conditional update on
//! `(status = RUNNING, started_at = <episode start>)`, so a worker and the
//! timeout monitor can never both commit a transition for the same episode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{Job, JobStatus};

/// The committed outcome of a failure or timeout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    /// RETRYING if retries remained, FAILED otherwise.
    pub status: JobStatus,
    /// Attempts after the increment.
    pub attempts: u32,
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub running: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Backend-agnostic store of durable job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a newly created job record.
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Fetch a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Transition a job to RUNNING, conditioned on it still being
    /// dispatchable (QUEUED or RETRYING). Sets `worker_id` and `started_at`.
    ///
    /// Returns false when the precondition fails — the caller must skip the
    /// job without mutation (double-dispatch guard).
    async fn mark_running(
        &self,
        id: Uuid,
        worker_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Transition a RUNNING job to COMPLETED, conditioned on the episode's
    /// `started_at`. Stores the result, sets `finished_at`, clears
    /// `worker_id`.
    ///
    /// Returns false when the episode was already closed by another party
    /// (e.g. the timeout monitor).
    async fn complete_job(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        result: &Value,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Apply the failure/timeout policy to a RUNNING job, conditioned on the
    /// episode's `started_at`: increment attempts, record `last_error`, move
    /// to RETRYING while `attempts <= max_retries`, FAILED otherwise
    /// (setting `finished_at`). Clears `worker_id` either way.
    ///
    /// Returns `None` when the episode was already closed.
    async fn fail_or_retry(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Option<FailureTransition>, StoreError>;

    /// Crash-recovery re-dispatch: move a RUNNING job back to QUEUED,
    /// conditioned on the episode's `started_at`, clearing `worker_id` and
    /// leaving the retry accounting untouched.
    async fn requeue_job(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// All jobs currently in the given status.
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// Aggregate counts per status.
    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;

    /// Mean seconds from `started_at` to `finished_at` over finished jobs,
    /// or 0.0 when none have finished.
    async fn average_latency_seconds(&self) -> Result<f64, StoreError>;

    /// Number of jobs completed since `window_start`.
    async fn completed_since(&self, window_start: DateTime<Utc>) -> Result<u64, StoreError>;
}
