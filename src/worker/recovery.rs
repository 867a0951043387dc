//! Stale-job recovery — re-queues jobs orphaned by a dead process.
//!
//! A job left RUNNING by a process that exited ungracefully still shows
//! RUNNING in the store, but the admission-gate state that owned it is gone.
//! Recovery moves such jobs back to QUEUED without incrementing attempts:
//! the process dying is not the job's fault.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::StoreError;
use crate::job::JobStatus;
use crate::queue::DispatchQueue;
use crate::store::JobStore;

/// Re-queue every RUNNING job whose episode started before
/// `now − stale_threshold`. Returns how many jobs were recovered.
pub async fn recover_stale_jobs(
    store: &Arc<dyn JobStore>,
    queue: &Arc<DispatchQueue>,
    stale_threshold: Duration,
) -> Result<usize, StoreError> {
    let cutoff = Utc::now()
        - chrono::Duration::from_std(stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

    let running = store.list_jobs_by_status(JobStatus::Running).await?;

    let mut recovered = 0;
    for job in running {
        let Some(started_at) = job.started_at else {
            continue;
        };
        if started_at >= cutoff {
            continue;
        }

        if store.requeue_job(job.id, started_at).await? {
            queue.push(job.id).await;
            info!(job_id = %job.id, "Recovered stale job, re-queued");
            recovered += 1;
        }
    }

    Ok(recovered)
}

/// Spawn the recovery loop. The first sweep runs immediately (startup
/// recovery); later sweeps catch anything orphaned while running.
pub fn spawn_recovery_task(
    store: Arc<dyn JobStore>,
    queue: Arc<DispatchQueue>,
    stale_threshold: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            threshold_secs = stale_threshold.as_secs(),
            "Stale-job recovery started"
        );
        let mut tick = tokio::time::interval(interval);
        loop {
            tick.tick().await;
            match recover_stale_jobs(&store, &queue, stale_threshold).await {
                Ok(0) => {}
                Ok(count) => info!(count, "Stale jobs recovered"),
                Err(e) => error!(error = %e, "Recovery sweep failed, will retry next tick"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use uuid::Uuid;

    use crate::job::Job;
    use crate::store::LibSqlStore;

    async fn setup() -> (Arc<dyn JobStore>, Arc<DispatchQueue>) {
        let store: Arc<dyn JobStore> = Arc::new(LibSqlStore::new_memory().await.unwrap());
        (store, DispatchQueue::new("test"))
    }

    async fn insert_running(store: &Arc<dyn JobStore>, running_for: i64) -> Job {
        let job = Job::new("user-1", "echo", json!({}), 3, 120);
        store.insert_job(&job).await.unwrap();
        let started = Utc::now() - chrono::Duration::seconds(running_for);
        store
            .mark_running(job.id, Uuid::new_v4(), started)
            .await
            .unwrap();
        store.get_job(job.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn stale_job_is_requeued_without_attempt_increment() {
        let (store, queue) = setup().await;
        let job = insert_running(&store, 400).await;

        let recovered = recover_stale_jobs(&store, &queue, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Queued);
        assert!(loaded.worker_id.is_none());
        assert_eq!(loaded.attempts, 0);
        assert!(loaded.last_error.is_none());

        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10)).await,
            Some(job.id)
        );
    }

    #[tokio::test]
    async fn fresh_running_job_is_left_alone() {
        let (store, queue) = setup().await;
        let job = insert_running(&store, 30).await;

        let recovered = recover_stale_jobs(&store, &queue, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(recovered, 0);

        let loaded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn non_running_jobs_are_ignored() {
        let (store, queue) = setup().await;
        let job = Job::new("user-1", "echo", json!({}), 3, 120);
        store.insert_job(&job).await.unwrap();

        let recovered = recover_stale_jobs(&store, &queue, Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(recovered, 0);
        assert!(queue.is_empty().await);
    }
}
