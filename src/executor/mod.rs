//! Job executor abstraction — pluggable per-job-type work functions.

pub mod builtin;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ExecutorError;

pub use registry::ExecutorRegistry;

/// The domain-specific work function invoked per job.
///
/// An executor may fail (the worker converts the error into a retry/fail
/// transition) or block indefinitely (the timeout monitor compensates with a
/// bookkeeping re-dispatch; the invocation itself is never interrupted).
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// The job-type string this executor handles.
    fn job_type(&self) -> &str;

    /// Execute the job logic against its payload.
    async fn execute(&self, payload: &Value) -> Result<Value, ExecutorError>;
}
