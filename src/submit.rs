//! Submission service — validates, records, and enqueues new jobs.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, JobError, SubmitError};
use crate::idempotency::{Claim, IdempotencyGuard};
use crate::job::{Job, JobStatus, StatusReport};
use crate::queue::DispatchQueue;
use crate::store::JobStore;

/// A submission request, as validated input from the transport layer.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: String,
    pub job_type: String,
    pub payload: Value,
    /// Defaults to the engine's `default_max_retries` when absent.
    pub max_retries: Option<u32>,
    /// Defaults to the engine's `default_timeout_seconds` when absent.
    pub timeout_seconds: Option<u32>,
    pub idempotency_key: Option<String>,
}

/// What a submission returns to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Accepts jobs: validate, record durably, then enqueue.
///
/// Side-effect ordering is record-then-enqueue, never the reverse: a failed
/// insert leaves nothing on the queue, and recovery never sees a queue entry
/// without a durable record behind it.
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    queue: Arc<DispatchQueue>,
    guard: Arc<IdempotencyGuard>,
    default_max_retries: u32,
    default_timeout_seconds: u32,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<DispatchQueue>,
        guard: Arc<IdempotencyGuard>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            guard,
            default_max_retries: config.default_max_retries,
            default_timeout_seconds: config.default_timeout_seconds,
        }
    }

    /// Submit a new job. Returns the job id and its status — the original
    /// job's *current* status when an idempotency key deduplicates the call.
    pub async fn submit(&self, request: NewJob) -> Result<SubmitReceipt, Error> {
        if request.job_type.trim().is_empty() {
            return Err(SubmitError::EmptyJobType.into());
        }
        let timeout_seconds = request
            .timeout_seconds
            .unwrap_or(self.default_timeout_seconds);
        if timeout_seconds == 0 {
            return Err(SubmitError::InvalidTimeout {
                seconds: timeout_seconds,
            }
            .into());
        }
        let max_retries = request.max_retries.unwrap_or(self.default_max_retries);

        let job = Job::new(
            request.user_id,
            request.job_type,
            request.payload,
            max_retries,
            timeout_seconds,
        );

        match &request.idempotency_key {
            Some(key) => match self.guard.claim(key, job.id).await {
                Claim::Existing(existing_id) => {
                    info!(
                        job_id = %existing_id,
                        key = %key,
                        "Duplicate submission, returning original job"
                    );
                    let existing = self
                        .store
                        .get_job(existing_id)
                        .await
                        .map_err(SubmitError::Store)?
                        .ok_or(JobError::NotFound { id: existing_id })?;
                    Ok(SubmitReceipt {
                        job_id: existing.id,
                        status: existing.status,
                    })
                }
                Claim::New => {
                    if let Err(e) = self.store.insert_job(&job).await {
                        // The key must not keep pointing at a job that never
                        // landed durably.
                        self.guard.release(key, job.id).await;
                        return Err(SubmitError::Store(e).into());
                    }
                    self.queue.push(job.id).await;
                    info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");
                    Ok(SubmitReceipt {
                        job_id: job.id,
                        status: job.status,
                    })
                }
            },
            None => {
                self.store
                    .insert_job(&job)
                    .await
                    .map_err(SubmitError::Store)?;
                self.queue.push(job.id).await;
                info!(job_id = %job.id, job_type = %job.job_type, "Job submitted");
                Ok(SubmitReceipt {
                    job_id: job.id,
                    status: job.status,
                })
            }
        }
    }

    /// Fetch the status report for a job.
    ///
    /// The report carries the owning `user_id`; authorization against the
    /// caller is the transport layer's check, not this core's.
    pub async fn status(&self, job_id: Uuid) -> Result<StatusReport, Error> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(JobError::NotFound { id: job_id })?;
        debug!(job_id = %job_id, status = %job.status, "Status query");
        Ok(StatusReport::from(&job))
    }
}
