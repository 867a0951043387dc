//! Engine metrics — aggregate views over the store and queue.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::queue::DispatchQueue;
use crate::store::{JobStore, StatusCounts};

/// Completed-job throughput over a trailing window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Throughput {
    pub jobs_per_window: u64,
    pub window_minutes: u32,
}

/// One point-in-time view of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queue_length: usize,
    pub counts: StatusCounts,
    pub avg_latency_seconds: f64,
    pub throughput: Throughput,
}

/// Collect a metrics snapshot. `window_minutes` sets the throughput window.
pub async fn snapshot(
    store: &Arc<dyn JobStore>,
    queue: &Arc<DispatchQueue>,
    window_minutes: u32,
) -> Result<MetricsSnapshot, StoreError> {
    let window_start = Utc::now() - chrono::Duration::minutes(i64::from(window_minutes));

    Ok(MetricsSnapshot {
        queue_length: queue.len().await,
        counts: store.count_by_status().await?,
        avg_latency_seconds: store.average_latency_seconds().await?,
        throughput: Throughput {
            jobs_per_window: store.completed_since(window_start).await?,
            window_minutes,
        },
    })
}
