use std::sync::Arc;

use jobflow::config::EngineConfig;
use jobflow::executor::ExecutorRegistry;
use jobflow::executor::builtin::{EchoExecutor, FailExecutor, SleepExecutor};
use jobflow::idempotency::{self, IdempotencyGuard};
use jobflow::notify::{FanoutRegistry, StatusNotifier, spawn_fanout_bridge};
use jobflow::queue::DispatchQueue;
use jobflow::store::{JobStore, LibSqlStore};
use jobflow::worker::{WorkerDeps, WorkerPool, recover_stale_jobs, spawn_recovery_task, spawn_timeout_monitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env()?;

    let db_path =
        std::env::var("JOBFLOW_DB_PATH").unwrap_or_else(|_| "./data/jobflow.db".to_string());

    eprintln!("jobflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Queue: {}", config.queue_name);
    eprintln!("   Database: {}", db_path);
    eprintln!(
        "   Workers: {} loops, {} concurrent executions",
        config.worker_loops, config.max_concurrent_jobs
    );
    eprintln!(
        "   Timeout monitor: every {}s, stale threshold {}s\n",
        config.monitor_interval.as_secs(),
        config.stale_threshold.as_secs()
    );

    // ── Store ───────────────────────────────────────────────────────────
    let store: Arc<dyn JobStore> =
        Arc::new(LibSqlStore::new_local(std::path::Path::new(&db_path)).await?);

    // ── Core plumbing ───────────────────────────────────────────────────
    let queue = DispatchQueue::new(config.queue_name.clone());
    let notifier = StatusNotifier::new();
    let fanout = FanoutRegistry::new();
    let _bridge_handle = spawn_fanout_bridge(&notifier, Arc::clone(&fanout));

    let guard = IdempotencyGuard::new(config.idempotency_ttl);
    let _purge_handle = idempotency::spawn_purge_task(Arc::clone(&guard), config.idempotency_ttl);

    // ── Executors ───────────────────────────────────────────────────────
    let executors = Arc::new(ExecutorRegistry::new());
    executors.register_sync(Arc::new(EchoExecutor));
    executors.register_sync(Arc::new(SleepExecutor));
    executors.register_sync(Arc::new(FailExecutor));
    tracing::info!(count = executors.count(), "Executors registered");

    // ── Startup recovery: reclaim jobs orphaned by a previous process ───
    let recovered = recover_stale_jobs(&store, &queue, config.stale_threshold).await?;
    if recovered > 0 {
        eprintln!("   Recovered {} stale jobs from previous run", recovered);
    }
    let _recovery_handle = spawn_recovery_task(
        Arc::clone(&store),
        Arc::clone(&queue),
        config.stale_threshold,
        config.stale_threshold,
    );

    // ── Status event log ────────────────────────────────────────────────
    {
        let mut events = notifier.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                tracing::info!(
                    job_id = %event.job_id,
                    status = %event.status,
                    "Job status changed"
                );
            }
        });
    }

    // ── Worker pool + timeout monitor ───────────────────────────────────
    let deps = WorkerDeps {
        store,
        queue,
        executors,
        notifier,
    };
    let _monitor_handle = spawn_timeout_monitor(deps.clone(), config.monitor_interval);

    let mut pool = WorkerPool::new(deps, &config);
    pool.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, finishing current jobs");
    pool.shutdown().await;

    Ok(())
}
