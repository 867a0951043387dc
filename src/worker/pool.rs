//! Worker pool — concurrency-bounded execution of dispatched jobs.
//!
//! Pop concurrency and execute concurrency are decoupled: any number of
//! loops may pull from the queue, but a counting admission gate bounds
//! executor invocations across the whole pool.
//!
//! Known limitation, compensated by the timeout monitor: an executor that
//! never returns cannot be preempted and holds its admission permit forever.
//! The monitor re-dispatches the job's bookkeeping; the stuck invocation
//! itself leaks the permit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ExecutorError;
use crate::executor::ExecutorRegistry;
use crate::job::JobStatus;
use crate::notify::StatusNotifier;
use crate::queue::DispatchQueue;
use crate::store::JobStore;

/// Shared dependencies for worker loops.
#[derive(Clone)]
pub struct WorkerDeps {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<DispatchQueue>,
    pub executors: Arc<ExecutorRegistry>,
    pub notifier: StatusNotifier,
}

/// Fixed-size pool of worker loops sharing one admission gate.
pub struct WorkerPool {
    deps: WorkerDeps,
    worker_loops: usize,
    pop_wait: std::time::Duration,
    gate: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool from the engine config. Loops start on `start()`.
    pub fn new(deps: WorkerDeps, config: &EngineConfig) -> Self {
        Self {
            deps,
            worker_loops: config.worker_loops,
            pop_wait: config.pop_wait,
            gate: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Spawn the worker loops.
    pub fn start(&mut self) {
        for _ in 0..self.worker_loops {
            let worker_id = Uuid::new_v4();
            let deps = self.deps.clone();
            let gate = Arc::clone(&self.gate);
            let shutdown = Arc::clone(&self.shutdown);
            let pop_wait = self.pop_wait;

            self.handles.push(tokio::spawn(async move {
                worker_loop(worker_id, deps, gate, shutdown, pop_wait).await;
            }));
        }
        info!(loops = self.worker_loops, "Worker pool started");
    }

    /// Request cooperative shutdown and wait for all loops to finish.
    ///
    /// Loops observe the flag after their current bounded pop (and after any
    /// job they already picked up completes); in-flight executions are
    /// allowed to finish.
    pub async fn shutdown(self) {
        info!("Worker pool shutdown requested, finishing current jobs");
        self.shutdown.store(true, Ordering::Relaxed);
        join_all(self.handles).await;
        info!("Worker pool stopped");
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

async fn worker_loop(
    worker_id: Uuid,
    deps: WorkerDeps,
    gate: Arc<Semaphore>,
    shutdown: Arc<AtomicBool>,
    pop_wait: std::time::Duration,
) {
    info!(worker_id = %worker_id, "Worker loop started, waiting for jobs");

    while !shutdown.load(Ordering::Relaxed) {
        let Some(job_id) = deps.queue.pop_timeout(pop_wait).await else {
            // Bounded wait expired — loop to re-check the shutdown flag.
            continue;
        };
        process_job(worker_id, &deps, &gate, job_id).await;
    }

    info!(worker_id = %worker_id, "Worker loop stopped");
}

/// Process a single dispatched job id: load, claim, execute, transition.
async fn process_job(worker_id: Uuid, deps: &WorkerDeps, gate: &Arc<Semaphore>, job_id: Uuid) {
    let job = match deps.store.get_job(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            // Queue and store should never diverge, but divergence must not
            // crash the loop.
            warn!(job_id = %job_id, "Dispatched job not found in store, skipping");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to load dispatched job");
            return;
        }
    };

    // Double-dispatch guard: a stale queue entry may reference a job the
    // monitor already moved on.
    if !job.status.is_dispatchable() {
        info!(job_id = %job_id, status = %job.status, "Skipping job, not dispatchable");
        return;
    }

    let started_at = Utc::now();
    match deps.store.mark_running(job_id, worker_id, started_at).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(job_id = %job_id, "Lost dispatch race, skipping");
            return;
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to mark job RUNNING");
            return;
        }
    }
    info!(job_id = %job_id, worker_id = %worker_id, "Job marked RUNNING");
    deps.notifier.publish(job_id, JobStatus::Running);

    debug!(job_id = %job_id, "Waiting for execution slot");
    let permit = match Arc::clone(gate).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return, // gate closed — pool is being torn down
    };
    debug!(job_id = %job_id, "Executing job (slot acquired)");
    let outcome = invoke_executor(deps, &job.job_type, &job.payload).await;
    drop(permit);
    debug!(job_id = %job_id, "Job finished, slot released");

    match outcome {
        Ok(result) => {
            match deps
                .store
                .complete_job(job_id, started_at, &result, Utc::now())
                .await
            {
                Ok(true) => {
                    info!(job_id = %job_id, "Job completed");
                    deps.notifier.publish(job_id, JobStatus::Completed);
                }
                Ok(false) => {
                    // The monitor closed the episode first (e.g. a timeout
                    // fired while the executor was still running).
                    warn!(job_id = %job_id, "Completion lost: episode already closed");
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to persist completion");
                }
            }
        }
        Err(e) => {
            apply_failure_transition(deps, job_id, started_at, &e.to_string()).await;
        }
    }
}

async fn invoke_executor(
    deps: &WorkerDeps,
    job_type: &str,
    payload: &Value,
) -> Result<Value, ExecutorError> {
    let Some(executor) = deps.executors.get(job_type).await else {
        return Err(ExecutorError::NotFound {
            job_type: job_type.to_string(),
        });
    };
    executor.execute(payload).await
}

/// Apply the shared failure/timeout policy: increment attempts, then either
/// RETRYING + re-enqueue or FAILED. Used by the worker loops and the timeout
/// monitor.
pub(crate) async fn apply_failure_transition(
    deps: &WorkerDeps,
    job_id: Uuid,
    started_at: DateTime<Utc>,
    error_text: &str,
) {
    match deps.store.fail_or_retry(job_id, started_at, error_text).await {
        Ok(Some(transition)) if transition.status == JobStatus::Retrying => {
            warn!(
                job_id = %job_id,
                attempts = transition.attempts,
                error = %error_text,
                "Job failed, retrying"
            );
            deps.notifier.publish(job_id, JobStatus::Retrying);
            deps.queue.push(job_id).await;
        }
        Ok(Some(transition)) => {
            error!(
                job_id = %job_id,
                attempts = transition.attempts,
                error = %error_text,
                "Job permanently failed"
            );
            deps.notifier.publish(job_id, JobStatus::Failed);
        }
        Ok(None) => {
            debug!(job_id = %job_id, "Failure not recorded: episode already closed");
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, "Failed to persist failure transition");
        }
    }
}
