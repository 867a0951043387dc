//! Status notification — broadcast of job transitions and per-job fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::job::JobStatus;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Per-observer delivery buffer.
const OBSERVER_CHANNEL_CAPACITY: usize = 64;

/// A job status transition, published on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
}

impl JobStatusEvent {
    pub fn new(job_id: Uuid, status: JobStatus) -> Self {
        Self {
            job_id,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job status transitions to any number of subscribers.
#[derive(Clone)]
pub struct StatusNotifier {
    tx: broadcast::Sender<JobStatusEvent>,
}

impl StatusNotifier {
    /// Create a notifier with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Publish a transition. Ok if no subscribers are listening yet.
    pub fn publish(&self, job_id: Uuid, status: JobStatus) {
        let event = JobStatusEvent::new(job_id, status);
        debug!(job_id = %job_id, status = %status, "Status published");
        let _ = self.tx.send(event);
    }

    /// Subscribe to all status events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobStatusEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as an async stream (lagged slots surface as `Err` items).
    pub fn event_stream(&self) -> BroadcastStream<JobStatusEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

struct Observer {
    id: Uuid,
    tx: mpsc::Sender<JobStatusEvent>,
}

/// Maps a job id to its current set of observers.
///
/// Registration and deregistration are owned by the transport layer (one
/// observer per open client connection); delivery iterates the set for the
/// event's job id. A full or closed observer is dropped from the set without
/// affecting delivery to the others.
pub struct FanoutRegistry {
    observers: RwLock<HashMap<Uuid, Vec<Observer>>>,
}

impl FanoutRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: RwLock::new(HashMap::new()),
        })
    }

    /// Register an observer for a job. Returns the observer id (for
    /// deregistration) and the receiving end of its delivery channel.
    pub async fn register(&self, job_id: Uuid) -> (Uuid, mpsc::Receiver<JobStatusEvent>) {
        let (tx, rx) = mpsc::channel(OBSERVER_CHANNEL_CAPACITY);
        let observer_id = Uuid::new_v4();
        self.observers
            .write()
            .await
            .entry(job_id)
            .or_default()
            .push(Observer {
                id: observer_id,
                tx,
            });
        debug!(job_id = %job_id, observer_id = %observer_id, "Observer registered");
        (observer_id, rx)
    }

    /// Remove one observer for a job.
    pub async fn unregister(&self, job_id: Uuid, observer_id: Uuid) {
        let mut observers = self.observers.write().await;
        if let Some(set) = observers.get_mut(&job_id) {
            set.retain(|o| o.id != observer_id);
            if set.is_empty() {
                observers.remove(&job_id);
            }
        }
    }

    /// Deliver an event to every observer registered for its job id.
    ///
    /// Observers whose channels are closed or full are dropped; one bad
    /// observer never blocks the rest.
    pub async fn deliver(&self, event: &JobStatusEvent) {
        let dead: Vec<Uuid> = {
            let observers = self.observers.read().await;
            let Some(set) = observers.get(&event.job_id) else {
                return;
            };

            set.iter()
                .filter_map(|observer| match observer.tx.try_send(event.clone()) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(
                            job_id = %event.job_id,
                            observer_id = %observer.id,
                            error = %e,
                            "Dropping unreachable observer"
                        );
                        Some(observer.id)
                    }
                })
                .collect()
        };

        if !dead.is_empty() {
            let mut observers = self.observers.write().await;
            if let Some(set) = observers.get_mut(&event.job_id) {
                set.retain(|o| !dead.contains(&o.id));
                if set.is_empty() {
                    observers.remove(&event.job_id);
                }
            }
        }
    }

    /// Number of observers currently registered for a job.
    pub async fn observer_count(&self, job_id: Uuid) -> usize {
        self.observers
            .read()
            .await
            .get(&job_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

/// Spawn the bridge task that forwards broadcast events into per-job fan-out.
///
/// Runs until the notifier (all broadcast senders) is dropped.
pub fn spawn_fanout_bridge(
    notifier: &StatusNotifier,
    registry: Arc<FanoutRegistry>,
) -> JoinHandle<()> {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => registry.deliver(&event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Fan-out bridge lagged behind status broadcast");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Status broadcast closed, fan-out bridge exiting");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let notifier = StatusNotifier::new();
        let mut rx = notifier.subscribe();
        let job_id = Uuid::new_v4();

        notifier.publish(job_id, JobStatus::Running);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let notifier = StatusNotifier::new();
        notifier.publish(Uuid::new_v4(), JobStatus::Completed);
    }

    #[tokio::test]
    async fn fanout_delivers_to_registered_job_only() {
        let registry = FanoutRegistry::new();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (_observer_id, mut rx) = registry.register(watched).await;

        registry
            .deliver(&JobStatusEvent::new(other, JobStatus::Running))
            .await;
        registry
            .deliver(&JobStatusEvent::new(watched, JobStatus::Completed))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, watched);
        assert_eq!(event.status, JobStatus::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fanout_survives_dead_observer() {
        let registry = FanoutRegistry::new();
        let job_id = Uuid::new_v4();

        let (_dead_id, dead_rx) = registry.register(job_id).await;
        let (_live_id, mut live_rx) = registry.register(job_id).await;
        drop(dead_rx);

        registry
            .deliver(&JobStatusEvent::new(job_id, JobStatus::Running))
            .await;

        let event = live_rx.recv().await.unwrap();
        assert_eq!(event.status, JobStatus::Running);
        // Dead observer was pruned
        assert_eq!(registry.observer_count(job_id).await, 1);
    }

    #[tokio::test]
    async fn unregister_removes_observer() {
        let registry = FanoutRegistry::new();
        let job_id = Uuid::new_v4();

        let (observer_id, mut rx) = registry.register(job_id).await;
        assert_eq!(registry.observer_count(job_id).await, 1);

        registry.unregister(job_id, observer_id).await;
        assert_eq!(registry.observer_count(job_id).await, 0);

        registry
            .deliver(&JobStatusEvent::new(job_id, JobStatus::Failed))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bridge_forwards_broadcast_to_observers() {
        let notifier = StatusNotifier::new();
        let registry = FanoutRegistry::new();
        let _bridge = spawn_fanout_bridge(&notifier, Arc::clone(&registry));

        let job_id = Uuid::new_v4();
        let (_observer_id, mut rx) = registry.register(job_id).await;

        notifier.publish(job_id, JobStatus::Retrying);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.status, JobStatus::Retrying);
    }
}
