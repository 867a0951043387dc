//! Error types for the job engine.

use uuid::Uuid;

use crate::job::JobStatus;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Record-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Submission validation and processing errors.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Job type must be a non-empty string")]
    EmptyJobType,

    #[error("Invalid timeout: {seconds} (must be a positive number of seconds)")]
    InvalidTimeout { seconds: u32 },

    #[error("Store error during submission: {0}")]
    Store(#[from] StoreError),
}

/// Job executor errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("No executor registered for job type {job_type}")]
    NotFound { job_type: String },

    #[error("Executor for {job_type} failed: {reason}")]
    Failed { job_type: String, reason: String },

    #[error("Invalid payload for {job_type}: {reason}")]
    InvalidPayload { job_type: String, reason: String },
}

/// Job lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Job {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
