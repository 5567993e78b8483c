use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;

use concierge_core::memory::{MemoryError, MemoryKey, MemoryStore};

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// TTL-aware key-value store. Expired entries are reclaimed lazily on read
/// and by `purge_expired`.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn get(&self, key: &MemoryKey) -> Result<Option<Value>, MemoryError> {
        let storage_key = key.storage_key();
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(&storage_key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // The entry was present but stale; drop it under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(&storage_key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(&storage_key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &MemoryKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), MemoryError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.storage_key(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &MemoryKey) -> Result<(), MemoryError> {
        let mut entries = self.entries.write().await;
        entries.remove(&key.storage_key());
        Ok(())
    }
}
