//! Cache module for storing normalized weather records
//!
//! Backends implement [`CacheStore`], a key to blob store with per-entry TTL.
//! The lookup service talks to them through [`RecordCache`], which owns
//! (de)serialization and fails open: a backend fault is logged and reported as
//! a miss, never as an error.

mod disk;
mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use disk::DiskStore;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisStore};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::{CacheKey, WeatherRecord};

/// Errors raised by a cache backend
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached or refused the operation
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// Filesystem error from the disk backend
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be encoded or decoded
    #[error("cache codec error: {0}")]
    Codec(String),
}

/// A key to blob store with per-entry expiry
///
/// Implementations must treat an expired entry exactly like a missing one.
/// Values are opaque bytes; callers own the encoding.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, or `None` if it is missing or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Removes `key`. Returns whether a live entry was removed.
    async fn invalidate(&self, key: &str) -> Result<bool, CacheError>;
}

/// Typed, fail-open view of a [`CacheStore`] holding weather records
#[derive(Clone)]
pub struct RecordCache {
    store: Arc<dyn CacheStore>,
}

impl RecordCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Reads a record. Backend faults and undecodable values count as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<WeatherRecord> {
        let bytes = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(key = %key, error = %err, "cached value undecodable, treating as miss");
                None
            }
        }
    }

    /// Writes a record. Failures are logged and swallowed.
    pub async fn set(&self, key: &CacheKey, record: &WeatherRecord, ttl: Duration) {
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %key, error = %err, "could not encode record for cache");
                return;
            }
        };

        match self.store.set(key.as_str(), &bytes, ttl).await {
            Ok(()) => debug!(key = %key, ttl_secs = ttl.as_secs(), "cached record"),
            Err(err) => warn!(key = %key, error = %err, "cache write failed"),
        }
    }

    /// Removes a record. Failures are logged and reported as `false`.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        match self.store.invalidate(key.as_str()).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(key = %key, error = %err, "cache invalidation failed");
                false
            }
        }
    }
}
