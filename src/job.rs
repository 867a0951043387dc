//! Job entity and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job is waiting on the dispatch queue.
    Queued,
    /// Job is being executed by a worker.
    Running,
    /// Job failed and has been re-queued for another attempt.
    Retrying,
    /// Job finished successfully.
    Completed,
    /// Job exhausted its retries and will not run again.
    Failed,
}

impl JobStatus {
    /// Check if this state allows transitioning to another state.
    ///
    /// `Running → Queued` is the crash-recovery re-dispatch: it does not
    /// count as a failure and must not touch the retry accounting.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Running)
                | (Retrying, Running)
                | (Running, Completed)
                | (Running, Retrying)
                | (Running, Failed)
                | (Running, Queued)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check if a worker is allowed to pick the job up in this state.
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Queued | Self::Retrying)
    }

    /// The database/wire string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Retrying => "RETRYING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "RETRYING" => Ok(Self::Retrying),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A unit of asynchronous work with a durable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID, generated at creation.
    pub id: Uuid,
    /// ID of the submitting principal. The transport layer uses this for
    /// ownership checks on status queries.
    pub user_id: String,
    /// Selects which executor runs the job.
    pub job_type: String,
    /// Worker currently holding the job. Non-null iff status is RUNNING.
    pub worker_id: Option<Uuid>,
    /// Opaque structured input.
    pub payload: Value,
    /// Executor output, set only on COMPLETED.
    pub result: Option<Value>,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Failures and timeouts so far.
    pub attempts: u32,
    /// Maximum retries allowed after the first attempt.
    pub max_retries: u32,
    /// Per-episode execution deadline, measured against `started_at`.
    pub timeout_seconds: u32,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Start of the *current* execution episode. Reset on every RUNNING
    /// transition.
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on the terminal transition.
    pub finished_at: Option<DateTime<Utc>>,
    /// Most recent failure or timeout message, retained across retries.
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new job in the QUEUED state.
    pub fn new(
        user_id: impl Into<String>,
        job_type: impl Into<String>,
        payload: Value,
        max_retries: u32,
        timeout_seconds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            job_type: job_type.into(),
            worker_id: None,
            payload,
            result: None,
            status: JobStatus::Queued,
            attempts: 0,
            max_retries,
            timeout_seconds,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// How long the current execution episode has been running.
    pub fn running_elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match (self.status, self.started_at) {
            (JobStatus::Running, Some(started)) => Some(now.signed_duration_since(started)),
            _ => None,
        }
    }

    /// Whether the current RUNNING episode has exceeded its deadline.
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.running_elapsed(now)
            .map(|elapsed| elapsed.num_seconds() > i64::from(self.timeout_seconds))
            .unwrap_or(false)
    }
}

/// Externally visible status report for a job.
///
/// This is the status-query shape: everything a client needs to follow a
/// job's progress, plus `user_id` so the transport layer can enforce
/// ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub job_id: Uuid,
    pub user_id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
}

impl From<&Job> for StatusReport {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            user_id: job.user_id.clone(),
            job_type: job.job_type.clone(),
            status: job.status,
            attempts: job.attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            last_error: job.last_error.clone(),
            result: job.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transitions_valid() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Retrying.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Retrying));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        // Crash-recovery re-dispatch
        assert!(JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn transitions_invalid() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Retrying.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn dispatchable_states() {
        assert!(JobStatus::Queued.is_dispatchable());
        assert!(JobStatus::Retrying.is_dispatchable());
        assert!(!JobStatus::Running.is_dispatchable());
        assert!(!JobStatus::Completed.is_dispatchable());
        assert!(!JobStatus::Failed.is_dispatchable());
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&JobStatus::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
        let parsed: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobStatus::Retrying);
    }

    #[test]
    fn status_str_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Retrying,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("PAUSED".parse::<JobStatus>().is_err());
    }

    #[test]
    fn new_job_defaults() {
        let job = Job::new("user-1", "echo", json!({"k": "v"}), 3, 120);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.worker_id.is_none());
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
        assert!(job.result.is_none());
    }

    #[test]
    fn timeout_check() {
        let mut job = Job::new("user-1", "sleep", json!({}), 0, 10);
        let now = Utc::now();

        // Not running yet — no timeout
        assert!(!job.is_timed_out(now));

        job.status = JobStatus::Running;
        job.started_at = Some(now - chrono::Duration::seconds(5));
        assert!(!job.is_timed_out(now));

        job.started_at = Some(now - chrono::Duration::seconds(11));
        assert!(job.is_timed_out(now));
    }

    #[test]
    fn status_report_from_job() {
        let job = Job::new("user-7", "echo", json!({"a": 1}), 2, 60);
        let report = StatusReport::from(&job);
        assert_eq!(report.job_id, job.id);
        assert_eq!(report.user_id, "user-7");
        assert_eq!(report.status, JobStatus::Queued);
        assert!(report.result.is_none());
    }
}
