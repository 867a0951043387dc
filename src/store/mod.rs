//! Persistence layer — durable job records behind an async trait.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{FailureTransition, JobStore, StatusCounts};
