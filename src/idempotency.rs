//! Idempotency guard — deduplicates retried submissions within a TTL window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// A live key reservation.
#[derive(Debug, Clone)]
struct IdempotencyRecord {
    job_id: Uuid,
    expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Outcome of an atomic key claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The key was free and is now reserved for the caller's job id.
    New,
    /// A live record already maps the key to this job id.
    Existing(Uuid),
}

/// Maps client-supplied submission keys to job ids for a bounded window.
///
/// All operations on a key happen under one lock, so two near-simultaneous
/// submissions with the same key cannot both observe "absent" — exactly one
/// gets `Claim::New`.
pub struct IdempotencyGuard {
    ttl: Duration,
    entries: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl IdempotencyGuard {
    /// Create a guard with the given record lifetime.
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        })
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::seconds(300))
    }

    /// Look up a live record for `key`.
    pub async fn check(&self, key: &str) -> Option<Uuid> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(record) if !record.is_expired(now) => Some(record.job_id),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Record `key → job_id` with the fixed TTL, replacing any prior record.
    pub async fn save(&self, key: &str, job_id: Uuid) {
        let now = Utc::now();
        let record = IdempotencyRecord {
            job_id,
            expires_at: self.expiry(now),
        };
        self.entries.lock().await.insert(key.to_string(), record);
        debug!(key = %key, job_id = %job_id, "Idempotency record saved");
    }

    /// Atomically reserve `key` for `job_id`, or return the job id a live
    /// record already points at.
    pub async fn claim(&self, key: &str, job_id: Uuid) -> Claim {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;

        if let Some(record) = entries.get(key) {
            if !record.is_expired(now) {
                return Claim::Existing(record.job_id);
            }
        }

        entries.insert(
            key.to_string(),
            IdempotencyRecord {
                job_id,
                expires_at: self.expiry(now),
            },
        );
        Claim::New
    }

    /// Drop the reservation for `key` if it still points at `job_id`.
    ///
    /// Used when the submission that claimed the key fails before its job
    /// record lands durably — the key must not keep pointing at a job that
    /// was never created.
    pub async fn release(&self, key: &str, job_id: Uuid) {
        let mut entries = self.entries.lock().await;
        if entries.get(key).map(|r| r.job_id) == Some(job_id) {
            entries.remove(key);
            debug!(key = %key, job_id = %job_id, "Idempotency reservation released");
        }
    }

    /// Remove expired records. Returns the number purged.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, record| !record.is_expired(now));
        before - entries.len()
    }

    /// Number of live and not-yet-purged records.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Check if the guard holds no records.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Spawn a background task that periodically purges expired records.
pub fn spawn_purge_task(guard: Arc<IdempotencyGuard>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        // Skip the immediate first tick; there is nothing to purge yet.
        tick.tick().await;
        loop {
            tick.tick().await;
            let purged = guard.purge_expired().await;
            if purged > 0 {
                info!(count = purged, "Purged expired idempotency records");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_and_save() {
        let guard = IdempotencyGuard::new(Duration::from_secs(300));
        let job_id = Uuid::new_v4();

        assert!(guard.check("abc").await.is_none());
        guard.save("abc", job_id).await;
        assert_eq!(guard.check("abc").await, Some(job_id));
    }

    #[tokio::test]
    async fn claim_is_first_wins() {
        let guard = IdempotencyGuard::new(Duration::from_secs(300));
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(guard.claim("abc", first).await, Claim::New);
        assert_eq!(guard.claim("abc", second).await, Claim::Existing(first));
        // Different key is unaffected
        assert_eq!(guard.claim("xyz", second).await, Claim::New);
    }

    #[tokio::test]
    async fn concurrent_claims_yield_one_winner() {
        let guard = IdempotencyGuard::new(Duration::from_secs(300));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = Arc::clone(&guard);
            handles.push(tokio::spawn(async move {
                guard.claim("abc", Uuid::new_v4()).await
            }));
        }

        let mut new_claims = 0;
        let mut existing = None;
        for handle in handles {
            match handle.await.unwrap() {
                Claim::New => new_claims += 1,
                Claim::Existing(id) => {
                    if let Some(prev) = existing {
                        assert_eq!(prev, id, "all losers must see the same winner");
                    }
                    existing = Some(id);
                }
            }
        }
        assert_eq!(new_claims, 1);
    }

    #[tokio::test]
    async fn expired_records_are_invisible() {
        let guard = IdempotencyGuard::new(Duration::from_millis(10));
        let first = Uuid::new_v4();

        guard.save("abc", first).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(guard.check("abc").await.is_none());
        // After expiry, a new claim wins the key
        let second = Uuid::new_v4();
        assert_eq!(guard.claim("abc", second).await, Claim::New);
    }

    #[tokio::test]
    async fn release_only_drops_own_reservation() {
        let guard = IdempotencyGuard::new(Duration::from_secs(300));
        let winner = Uuid::new_v4();

        guard.save("abc", winner).await;
        guard.release("abc", Uuid::new_v4()).await;
        assert_eq!(guard.check("abc").await, Some(winner));

        guard.release("abc", winner).await;
        assert!(guard.check("abc").await.is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let guard = IdempotencyGuard::new(Duration::from_millis(10));
        guard.save("old", Uuid::new_v4()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh_guard_record = Uuid::new_v4();
        {
            // Insert a fresh record directly with a longer expiry
            let mut entries = guard.entries.lock().await;
            entries.insert(
                "fresh".to_string(),
                IdempotencyRecord {
                    job_id: fresh_guard_record,
                    expires_at: Utc::now() + chrono::Duration::seconds(60),
                },
            );
        }

        assert_eq!(guard.purge_expired().await, 1);
        assert_eq!(guard.len().await, 1);
        assert_eq!(guard.check("fresh").await, Some(fresh_guard_record));
    }
}
