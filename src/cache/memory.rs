//! In-process cache backend
//!
//! Entries are timestamped with `tokio::time::Instant`, so tests can pause and
//! advance the clock instead of sleeping.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{CacheError, CacheStore};

/// An immutable stored value with its expiry window
#[derive(Debug)]
struct CacheEntry {
    value: Vec<u8>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    /// An expiry past the clock's range never arrives
    fn is_live(&self, now: Instant) -> bool {
        self.stored_at
            .checked_add(self.ttl)
            .map_or(true, |expires_at| now < expires_at)
    }
}

/// A `HashMap`-backed store with lazy expiry
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries physically resident, including expired ones not yet evicted
    pub async fn resident_len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: evict, unless a fresh entry replaced it in the meantime
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value: value.to_vec(),
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }
}
