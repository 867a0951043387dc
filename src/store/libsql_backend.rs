//! libSQL backend — async `JobStore` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are written
//! as RFC 3339 strings; the compare-and-swap updates rely on every writer
//! using the same canonical format.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{Job, JobStatus};
use crate::store::migrations;
use crate::store::traits::{FailureTransition, JobStore, StatusCounts};

/// Column list shared by every job SELECT; `row_to_job` indexes into it.
const JOB_COLUMNS: &str = "id, user_id, job_type, worker_id, payload, result, status, \
     attempts, max_retries, timeout_seconds, created_at, updated_at, \
     started_at, finished_at, last_error";

/// libSQL job store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Job store opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_json(s: &str) -> Result<Value, StoreError> {
    serde_json::from_str(s).map_err(|e| StoreError::Serialization(format!("bad JSON column: {e}")))
}

/// Map a libsql row (in `JOB_COLUMNS` order) to a Job.
fn row_to_job(row: &libsql::Row) -> Result<Job, StoreError> {
    let get_text = |idx: i32| -> Result<String, StoreError> {
        row.get::<String>(idx)
            .map_err(|e| StoreError::Query(format!("column {idx}: {e}")))
    };
    let get_opt_text = |idx: i32| -> Option<String> { row.get::<String>(idx).ok() };
    let get_int = |idx: i32| -> Result<i64, StoreError> {
        row.get::<i64>(idx)
            .map_err(|e| StoreError::Query(format!("column {idx}: {e}")))
    };

    let id_str = get_text(0)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Query(format!("bad job id {id_str}: {e}")))?;
    let worker_id = get_opt_text(3).and_then(|s| Uuid::parse_str(&s).ok());
    let status_str = get_text(6)?;
    let status: JobStatus = status_str
        .parse()
        .map_err(|e: String| StoreError::Query(e))?;

    Ok(Job {
        id,
        user_id: get_text(1)?,
        job_type: get_text(2)?,
        worker_id,
        payload: parse_json(&get_text(4)?)?,
        result: get_opt_text(5).map(|s| parse_json(&s)).transpose()?,
        status,
        attempts: get_int(7)? as u32,
        max_retries: get_int(8)? as u32,
        timeout_seconds: get_int(9)? as u32,
        created_at: parse_datetime(&get_text(10)?),
        updated_at: parse_datetime(&get_text(11)?),
        started_at: get_opt_text(12).map(|s| parse_datetime(&s)),
        finished_at: get_opt_text(13).map(|s| parse_datetime(&s)),
        last_error: get_opt_text(14),
    })
}

fn json_to_string(value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Convert `Option<String>` to a libsql Value (NULL when absent).
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

#[async_trait]
impl JobStore for LibSqlStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let conn = self.conn();
        let result = match &job.result {
            Some(value) => Some(json_to_string(value)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO jobs (id, user_id, job_type, worker_id, payload, result, status, \
             attempts, max_retries, timeout_seconds, created_at, updated_at, started_at, \
             finished_at, last_error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id.to_string(),
                job.user_id.clone(),
                job.job_type.clone(),
                opt_text_owned(job.worker_id.map(|w| w.to_string())),
                json_to_string(&job.payload)?,
                opt_text_owned(result),
                job.status.as_str(),
                i64::from(job.attempts),
                i64::from(job.max_retries),
                i64::from(job.timeout_seconds),
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
                opt_text_owned(job.started_at.map(|t| t.to_rfc3339())),
                opt_text_owned(job.finished_at.map(|t| t.to_rfc3339())),
                opt_text_owned(job.last_error.clone()),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("insert_job: {e}")))?;

        debug!(job_id = %job.id, job_type = %job.job_type, "Job inserted");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_job: {e}"))),
        }
    }

    async fn mark_running(
        &self,
        id: Uuid,
        worker_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE jobs SET status = 'RUNNING', worker_id = ?1, started_at = ?2, \
                 updated_at = ?2 WHERE id = ?3 AND status IN ('QUEUED', 'RETRYING')",
                params![
                    worker_id.to_string(),
                    started_at.to_rfc3339(),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_running: {e}")))?;

        Ok(changed == 1)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        result: &Value,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE jobs SET status = 'COMPLETED', result = ?1, finished_at = ?2, \
                 updated_at = ?2, worker_id = NULL \
                 WHERE id = ?3 AND status = 'RUNNING' AND started_at = ?4",
                params![
                    json_to_string(result)?,
                    finished_at.to_rfc3339(),
                    id.to_string(),
                    started_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("complete_job: {e}")))?;

        Ok(changed == 1)
    }

    async fn fail_or_retry(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Option<FailureTransition>, StoreError> {
        // Read the current accounting, then commit conditionally on the
        // episode AND the attempts we read, so a concurrent closer loses
        // cleanly rather than double-incrementing.
        let Some(job) = self.get_job(id).await? else {
            return Ok(None);
        };
        if job.status != JobStatus::Running || job.started_at != Some(started_at) {
            return Ok(None);
        }

        let attempts = job.attempts + 1;
        let status = if attempts <= job.max_retries {
            JobStatus::Retrying
        } else {
            JobStatus::Failed
        };
        let now = Utc::now().to_rfc3339();
        let finished_at = (status == JobStatus::Failed).then(|| now.clone());

        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE jobs SET status = ?1, attempts = ?2, last_error = ?3, \
                 finished_at = COALESCE(?4, finished_at), updated_at = ?5, worker_id = NULL \
                 WHERE id = ?6 AND status = 'RUNNING' AND started_at = ?7 AND attempts = ?8",
                params![
                    status.as_str(),
                    i64::from(attempts),
                    error,
                    opt_text_owned(finished_at),
                    now,
                    id.to_string(),
                    started_at.to_rfc3339(),
                    i64::from(job.attempts)
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("fail_or_retry: {e}")))?;

        if changed == 1 {
            Ok(Some(FailureTransition { status, attempts }))
        } else {
            Ok(None)
        }
    }

    async fn requeue_job(&self, id: Uuid, started_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE jobs SET status = 'QUEUED', worker_id = NULL, updated_at = ?1 \
                 WHERE id = ?2 AND status = 'RUNNING' AND started_at = ?3",
                params![
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                    started_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("requeue_job: {e}")))?;

        Ok(changed == 1)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_jobs_by_status: {e}")))?;

        let mut jobs = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM jobs GROUP BY status", ())
            .await
            .map_err(|e| StoreError::Query(format!("count_by_status: {e}")))?;

        let mut counts = StatusCounts::default();
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("count_by_status: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("count_by_status: {e}")))?;
            let count = count as u64;
            match status.as_str() {
                "QUEUED" => counts.queued = count,
                "RUNNING" => counts.running = count,
                "RETRYING" => counts.retrying = count,
                "COMPLETED" => counts.completed = count,
                "FAILED" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn average_latency_seconds(&self) -> Result<f64, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT started_at, finished_at FROM jobs \
                 WHERE started_at IS NOT NULL AND finished_at IS NOT NULL",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("average_latency_seconds: {e}")))?;

        let mut total = 0.0_f64;
        let mut count = 0u64;
        while let Ok(Some(row)) = rows.next().await {
            let started: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("average_latency_seconds: {e}")))?;
            let finished: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("average_latency_seconds: {e}")))?;
            let latency = parse_datetime(&finished)
                .signed_duration_since(parse_datetime(&started))
                .num_milliseconds() as f64
                / 1000.0;
            total += latency;
            count += 1;
        }

        if count == 0 {
            Ok(0.0)
        } else {
            Ok(total / count as f64)
        }
    }

    async fn completed_since(&self, window_start: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM jobs \
                 WHERE status = 'COMPLETED' AND finished_at >= ?1",
                params![window_start.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("completed_since: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("completed_since: {e}")))?;
                Ok(count as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(StoreError::Query(format!("completed_since: {e}"))),
        }
    }
}
