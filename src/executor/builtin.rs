//! Built-in executors for demos and tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::error::ExecutorError;
use crate::executor::JobExecutor;

/// Echoes the payload back as the result.
pub struct EchoExecutor;

#[async_trait]
impl JobExecutor for EchoExecutor {
    fn job_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, payload: &Value) -> Result<Value, ExecutorError> {
        Ok(json!({
            "job_type": "echo",
            "input": payload,
        }))
    }
}

/// Sleeps for `delay_seconds` (default 20) and reports how long it slept.
///
/// With `{"force_stuck": true}` the future never resolves — the stand-in for
/// an executor that blocks forever, used to exercise the timeout monitor.
pub struct SleepExecutor;

#[async_trait]
impl JobExecutor for SleepExecutor {
    fn job_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, payload: &Value) -> Result<Value, ExecutorError> {
        if payload.get("force_stuck").and_then(Value::as_bool) == Some(true) {
            info!("Simulating stuck job");
            std::future::pending::<()>().await;
        }

        let delay = match payload.get("delay_seconds") {
            None => 20,
            Some(value) => value.as_u64().ok_or_else(|| ExecutorError::InvalidPayload {
                job_type: "sleep".to_string(),
                reason: format!("delay_seconds must be a non-negative integer, got {value}"),
            })?,
        };

        info!(delay_seconds = delay, "Executing job, sleeping");
        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;

        Ok(json!({
            "job_type": "sleep",
            "input": payload,
            "message": format!("Job executed after {delay} seconds"),
        }))
    }
}

/// Always fails, with an optional `reason` from the payload.
pub struct FailExecutor;

#[async_trait]
impl JobExecutor for FailExecutor {
    fn job_type(&self) -> &str {
        "fail"
    }

    async fn execute(&self, payload: &Value) -> Result<Value, ExecutorError> {
        let reason = payload
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("Simulated job failure")
            .to_string();
        Err(ExecutorError::Failed {
            job_type: "fail".to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_returns_payload() {
        let result = EchoExecutor.execute(&json!({"k": "v"})).await.unwrap();
        assert_eq!(result["input"]["k"], "v");
    }

    #[tokio::test]
    async fn sleep_honors_delay() {
        let start = std::time::Instant::now();
        let result = SleepExecutor
            .execute(&json!({"delay_seconds": 0}))
            .await
            .unwrap();
        assert!(start.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(result["message"], "Job executed after 0 seconds");
    }

    #[tokio::test]
    async fn sleep_rejects_bad_delay() {
        let err = SleepExecutor
            .execute(&json!({"delay_seconds": "soon"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn fail_uses_payload_reason() {
        let err = FailExecutor
            .execute(&json!({"reason": "boom"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn fail_has_default_reason() {
        let err = FailExecutor.execute(&json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Simulated job failure"));
    }
}
