//! Namespaced key-value memory for plugins.
//!
//! Two interchangeable implementations live behind [`MemoryStore`]: an
//! in-process map with lazy TTL eviction and a remote store over a
//! [`KvBackend`]. Either can be wrapped in the [`SecureStore`] AEAD envelope
//! when an encryption key is configured.
//!
//! Keys arriving here are already namespaced by the calling plugin's id; the
//! sandbox prepends `pluginId:` to any key missing a colon before dispatch.

mod in_memory;
mod remote;
mod secure;

pub use in_memory::InMemoryStore;
pub use remote::{KvBackend, RemoteStore, SCAN_BATCH};
pub use secure::{EnvelopeKeys, SecureStore};

use async_trait::async_trait;
use frontclaw_contract::{codes, ErrorObject};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory backend error: {0}")]
    Backend(String),

    #[error("stored envelope failed signature verification")]
    SignatureMismatch,

    #[error("envelope error: {0}")]
    Envelope(String),

    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
}

impl From<MemoryError> for ErrorObject {
    fn from(err: MemoryError) -> Self {
        match &err {
            MemoryError::SignatureMismatch => {
                ErrorObject::new(codes::SIGNATURE_MISMATCH, err.to_string())
            }
            _ => ErrorObject::new("MEMORY_ERROR", err.to_string()),
        }
    }
}

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// No such key (or it expired).
    Missing,
    /// Key exists with no expiry.
    Persistent,
    /// Key expires in roughly this many seconds.
    ExpiresIn(u64),
}

/// The capability surface plugins see through the `memory.*` sys-calls.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, MemoryError>;

    /// Store a value, optionally expiring after `ttl_secs`.
    async fn set(&self, key: &str, value: String, ttl_secs: Option<u64>)
        -> Result<(), MemoryError>;

    /// Returns true when a key was actually removed.
    async fn delete(&self, key: &str) -> Result<bool, MemoryError>;

    /// List keys, optionally filtered by literal prefix, optionally capped.
    async fn list(
        &self,
        prefix: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<String>, MemoryError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, MemoryError>;
}
