//! Timeout monitor — periodic sweep that times out stuck RUNNING jobs.
//!
//! This is the sole mechanism that terminates jobs whose executor never
//! returns: the executor itself cannot be interrupted, so the monitor only
//! updates the bookkeeping and creates a new dispatch entry on retry. The
//! original stuck invocation keeps its admission slot.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::StoreError;
use crate::job::JobStatus;
use crate::worker::pool::{WorkerDeps, apply_failure_transition};

/// Error marker recorded on a timeout transition.
const TIMEOUT_ERROR: &str = "job timed out";

/// Run one sweep: apply the failure/retry policy to every RUNNING job whose
/// current episode exceeded its deadline. Returns how many jobs timed out.
pub async fn run_timeout_sweep(deps: &WorkerDeps) -> Result<usize, StoreError> {
    let now = Utc::now();
    let running = deps.store.list_jobs_by_status(JobStatus::Running).await?;

    let mut timed_out = 0;
    for job in running {
        if !job.is_timed_out(now) {
            continue;
        }
        let Some(started_at) = job.started_at else {
            continue;
        };

        info!(
            job_id = %job.id,
            timeout_seconds = job.timeout_seconds,
            "Job exceeded its deadline"
        );
        apply_failure_transition(deps, job.id, started_at, TIMEOUT_ERROR).await;
        timed_out += 1;
    }

    Ok(timed_out)
}

/// Spawn the monitor loop. A failed sweep logs and waits for the next tick.
pub fn spawn_timeout_monitor(deps: WorkerDeps, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Timeout monitor started");
        let mut tick = tokio::time::interval(interval);
        // First tick fires immediately: sweep, then wait out each interval.
        loop {
            tick.tick().await;
            match run_timeout_sweep(&deps).await {
                Ok(0) => {}
                Ok(count) => info!(count, "Timed out jobs re-dispatched or failed"),
                Err(e) => error!(error = %e, "Timeout sweep failed, will retry next tick"),
            }
        }
    })
}
