use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Advisory lock on one shared-state path.
#[derive(Clone, Debug)]
pub struct SyncLock {
    pub owner: String,
    pub path: String,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

impl SyncLock {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("path `{path}` is locked by `{owner}`")]
    Locked { path: String, owner: String },
    #[error("`{owner}` holds no lock on `{path}`")]
    NotHeld { path: String, owner: String },
}

/// Record of a write that landed while another agent held the path.
#[derive(Clone, Debug)]
pub struct ConflictRecord {
    pub path: String,
    pub writer: String,
    pub lock_owner: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub conflicted: bool,
    pub subscribers_notified: usize,
}

type SubscriberCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct Subscriber {
    owner: String,
    prefix: String,
    callback: SubscriberCallback,
}

struct Inner {
    locks: HashMap<String, SyncLock>,
    values: HashMap<String, (Value, String)>,
    subscribers: Vec<Subscriber>,
    conflicts: Vec<ConflictRecord>,
}

/// Coordinates shared-state writes between collaborating agents.
///
/// At most one live lock exists per path; expired locks are reclaimed lazily
/// by the next acquire. Writes are last-writer-wins: a write that
/// lands while another agent holds the path is applied anyway and recorded as
/// a conflict rather than rejected.
pub struct StateSynchronizer {
    default_ttl: Duration,
    inner: Mutex<Inner>,
}

impl StateSynchronizer {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            inner: Mutex::new(Inner {
                locks: HashMap::new(),
                values: HashMap::new(),
                subscribers: Vec::new(),
                conflicts: Vec::new(),
            }),
        }
    }

    pub async fn acquire(&self, owner: &str, path: &str) -> Result<SyncLock, SyncError> {
        self.acquire_with_ttl(owner, path, self.default_ttl).await
    }

    pub async fn acquire_with_ttl(
        &self,
        owner: &str,
        path: &str,
        ttl: Duration,
    ) -> Result<SyncLock, SyncError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.locks.get(path) {
            if !existing.is_expired() && existing.owner != owner {
                return Err(SyncError::Locked {
                    path: path.to_string(),
                    owner: existing.owner.clone(),
                });
            }
            if existing.is_expired() {
                debug!(event_name = "sync.lock_reclaimed", path = %path, stale_owner = %existing.owner);
            }
        }

        let now = Instant::now();
        let lock = SyncLock {
            owner: owner.to_string(),
            path: path.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        inner.locks.insert(path.to_string(), lock.clone());
        Ok(lock)
    }

    pub async fn release(&self, owner: &str, path: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.lock().await;
        match inner.locks.get(path) {
            Some(lock) if lock.owner == owner => {
                inner.locks.remove(path);
                Ok(())
            }
            _ => Err(SyncError::NotHeld { path: path.to_string(), owner: owner.to_string() }),
        }
    }

    /// Applies a write and notifies matching subscribers, excluding the
    /// writer. Subscriber callbacks run under the synchronizer lock and must
    /// not call back into it.
    pub async fn apply_update(&self, writer: &str, path: &str, value: Value) -> UpdateReport {
        let mut inner = self.inner.lock().await;

        let mut report = UpdateReport::default();
        let foreign_lock_owner = inner
            .locks
            .get(path)
            .filter(|lock| !lock.is_expired() && lock.owner != writer)
            .map(|lock| lock.owner.clone());
        if let Some(lock_owner) = foreign_lock_owner {
            warn!(
                event_name = "sync.conflict",
                path = %path,
                writer = %writer,
                lock_owner = %lock_owner,
            );
            inner.conflicts.push(ConflictRecord {
                path: path.to_string(),
                writer: writer.to_string(),
                lock_owner,
                at: Utc::now(),
            });
            report.conflicted = true;
        }

        inner.values.insert(path.to_string(), (value.clone(), writer.to_string()));

        for subscriber in &inner.subscribers {
            if subscriber.owner != writer && path.starts_with(subscriber.prefix.as_str()) {
                (subscriber.callback)(path, &value);
                report.subscribers_notified += 1;
            }
        }

        report
    }

    pub async fn subscribe<F>(&self, owner: &str, prefix: &str, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().await;
        inner.subscribers.push(Subscriber {
            owner: owner.to_string(),
            prefix: prefix.to_string(),
            callback: Arc::new(callback),
        });
    }

    pub async fn value(&self, path: &str) -> Option<Value> {
        let inner = self.inner.lock().await;
        inner.values.get(path).map(|(value, _)| value.clone())
    }

    pub async fn last_writer(&self, path: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.values.get(path).map(|(_, writer)| writer.clone())
    }

    pub async fn conflicts(&self) -> Vec<ConflictRecord> {
        let inner = self.inner.lock().await;
        inner.conflicts.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use super::{StateSynchronizer, SyncError};

    fn synchronizer_fixture() -> StateSynchronizer {
        StateSynchronizer::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn second_owner_cannot_acquire_a_held_path() {
        let sync = synchronizer_fixture();
        sync.acquire("client_agent", "clients/42").await.expect("first acquire");

        let denied = sync.acquire("contract_agent", "clients/42").await;
        assert_eq!(
            denied.err(),
            Some(SyncError::Locked {
                path: "clients/42".to_string(),
                owner: "client_agent".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn expired_locks_are_reclaimed_on_next_acquire() {
        let sync = synchronizer_fixture();
        sync.acquire_with_ttl("client_agent", "clients/42", Duration::ZERO)
            .await
            .expect("first acquire");

        let lock = sync
            .acquire("contract_agent", "clients/42")
            .await
            .expect("stale lock is reclaimable");
        assert_eq!(lock.owner, "contract_agent");
    }

    #[tokio::test]
    async fn release_requires_the_holding_owner() {
        let sync = synchronizer_fixture();
        sync.acquire("client_agent", "clients/42").await.expect("acquire");

        assert!(sync.release("contract_agent", "clients/42").await.is_err());
        assert!(sync.release("client_agent", "clients/42").await.is_ok());
        assert!(sync.release("client_agent", "clients/42").await.is_err());
    }

    #[tokio::test]
    async fn re_acquire_by_same_owner_refreshes_the_lock() {
        let sync = synchronizer_fixture();
        sync.acquire("client_agent", "clients/42").await.expect("acquire");
        assert!(sync.acquire("client_agent", "clients/42").await.is_ok());
    }

    #[tokio::test]
    async fn conflicting_write_wins_but_is_recorded() {
        let sync = synchronizer_fixture();
        sync.acquire("client_agent", "clients/42").await.expect("acquire");

        let report = sync.apply_update("contract_agent", "clients/42", json!({"name": "B"})).await;
        assert!(report.conflicted);

        assert_eq!(sync.value("clients/42").await, Some(json!({"name": "B"})));
        assert_eq!(sync.last_writer("clients/42").await.as_deref(), Some("contract_agent"));

        let conflicts = sync.conflicts().await;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].writer, "contract_agent");
        assert_eq!(conflicts[0].lock_owner, "client_agent");
    }

    #[tokio::test]
    async fn subscribers_see_prefix_matches_but_never_their_own_writes() {
        let sync = synchronizer_fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        sync.subscribe("contract_agent", "clients/", move |path, _value| {
            sink.lock().expect("seen lock").push(path.to_string());
        })
        .await;

        let own = sync.apply_update("contract_agent", "clients/42", json!(1)).await;
        assert_eq!(own.subscribers_notified, 0);

        let other = sync.apply_update("client_agent", "clients/42", json!(2)).await;
        assert_eq!(other.subscribers_notified, 1);

        let unrelated = sync.apply_update("client_agent", "employees/7", json!(3)).await;
        assert_eq!(unrelated.subscribers_notified, 0);

        assert_eq!(*seen.lock().expect("seen lock"), vec!["clients/42".to_string()]);
    }
}
