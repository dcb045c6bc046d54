//! In-process memory store.
//!
//! TTL is enforced on read: an expired entry behaves as absent and is evicted
//! the next time any call touches it. No background sweeper.

use crate::{KeyTtl, MemoryError, MemoryStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Lazy eviction of the expired entry.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl_secs: Option<u64>,
    ) -> Result<(), MemoryError> {
        let expires_at = ttl_secs.map(|s| Instant::now() + Duration::from_secs(s));
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.expired(now)),
            None => Ok(false),
        }
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, MemoryError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.expired(now))
            .map(|(key, _)| key.clone())
            .filter(|key| prefix.map_or(true, |p| key.starts_with(p)))
            .collect();
        keys.sort();
        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, MemoryError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        match entries.get(key) {
            None => Ok(KeyTtl::Missing),
            Some(entry) if entry.expired(now) => Ok(KeyTtl::Missing),
            Some(Entry {
                expires_at: None, ..
            }) => Ok(KeyTtl::Persistent),
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => Ok(KeyTtl::ExpiresIn((*at - now).as_secs())),
        }
    }
}
