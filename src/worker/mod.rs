//! Worker pool, timeout monitor, and stale-job recovery.

pub mod monitor;
pub mod pool;
pub mod recovery;

pub use monitor::{run_timeout_sweep, spawn_timeout_monitor};
pub use pool::{WorkerDeps, WorkerPool};
pub use recovery::{recover_stale_jobs, spawn_recovery_task};
