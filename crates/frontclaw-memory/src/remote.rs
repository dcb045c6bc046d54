//! Remote memory store over a Redis-like backend.
//!
//! The backend itself is external; this module owns only the protocol shape
//! the core relies on: atomic get/set with expiry and cursor-based key scans
//! consumed in batches of [`SCAN_BATCH`].

use crate::{KeyTtl, MemoryError, MemoryStore};
use async_trait::async_trait;

/// Keys fetched per scan round-trip.
pub const SCAN_BATCH: usize = 200;

/// Minimal surface of the remote key-value service.
///
/// `scan` follows Redis cursor semantics: start at cursor `0`, feed the
/// returned cursor back in, stop when it returns `0` again.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), MemoryError>;
    async fn del(&self, key: &str) -> Result<bool, MemoryError>;
    async fn scan(
        &self,
        cursor: u64,
        match_prefix: Option<&str>,
        count: usize,
    ) -> Result<(u64, Vec<String>), MemoryError>;
    async fn ttl(&self, key: &str) -> Result<KeyTtl, MemoryError>;
}

pub struct RemoteStore<B> {
    backend: B,
}

impl<B: KvBackend> RemoteStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<B: KvBackend> MemoryStore for RemoteStore<B> {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError> {
        self.backend.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl_secs: Option<u64>,
    ) -> Result<(), MemoryError> {
        self.backend.set(key, &value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<bool, MemoryError> {
        self.backend.del(key).await
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, MemoryError> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch) = self.backend.scan(cursor, prefix, SCAN_BATCH).await?;
            keys.extend(batch);
            if let Some(limit) = limit {
                if keys.len() >= limit {
                    keys.truncate(limit);
                    break;
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, MemoryError> {
        self.backend.ttl(key).await
    }
}
