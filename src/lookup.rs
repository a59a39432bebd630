//! Cache-aside weather lookups
//!
//! `WeatherService` answers from the cache when it can and otherwise fetches
//! from the upstream source, populating the cache on success. Concurrent misses
//! for the same key share one upstream fetch: the first caller registers an
//! in-flight entry, later callers await the same shared result.
//!
//! The fetch itself runs in a spawned task, so it finishes and populates the
//! cache even if every waiting caller goes away. A key's in-flight entry is
//! removed only after its cache write, which keeps writes for one key in
//! completion order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::RecordCache;
use crate::data::{
    CacheKey, LocationQuery, UpstreamError, ValidationError, WeatherRecord, WeatherSource,
};

/// Retries beyond this are never attempted, whatever the policy says
const MAX_RETRIES: u32 = 1;

/// Errors visible to callers of [`WeatherService::lookup`]
///
/// Cache faults never appear here; they degrade to a miss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The request was malformed
    #[error("invalid lookup: {0}")]
    Validation(#[from] ValidationError),

    /// The provider does not recognise the location
    #[error("unknown location '{0}'")]
    NotFound(String),

    /// The provider could not serve the request
    #[error("weather service unavailable: {0}")]
    Unavailable(String),
}

impl LookupError {
    /// True when the caller's input is at fault rather than the service
    pub fn is_caller_error(&self) -> bool {
        matches!(self, LookupError::Validation(_) | LookupError::NotFound(_))
    }

    fn from_upstream(err: UpstreamError, query: &LocationQuery) -> Self {
        match err {
            UpstreamError::NotFound { .. } => LookupError::NotFound(query.to_string()),
            other => LookupError::Unavailable(other.to_string()),
        }
    }
}

/// Tunables for the lookup protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPolicy {
    /// How long a fetched record stays fresh in the cache
    pub ttl: Duration,
    /// Upper bound on one upstream call
    pub fetch_timeout: Duration,
    /// Retries after a retryable failure (capped at one)
    pub max_retries: u32,
    /// Pause before a retry
    pub retry_backoff: Duration,
}

impl Default for LookupPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(10),
            max_retries: MAX_RETRIES,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

type LookupResult = Result<Arc<WeatherRecord>, LookupError>;

/// A fetch shared by every caller that missed the same key
type Flight = Shared<BoxFuture<'static, LookupResult>>;

struct Inner {
    cache: RecordCache,
    source: Arc<dyn WeatherSource>,
    policy: LookupPolicy,
    in_flight: DashMap<CacheKey, Flight>,
}

/// The cache-aside lookup service
///
/// Cheap to clone; clones share the cache handle, the source and the in-flight
/// table.
#[derive(Clone)]
pub struct WeatherService {
    inner: Arc<Inner>,
}

impl WeatherService {
    pub fn new(cache: RecordCache, source: Arc<dyn WeatherSource>, policy: LookupPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                source,
                policy,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn policy(&self) -> &LookupPolicy {
        &self.inner.policy
    }

    /// Returns current weather for `query`, from cache when fresh.
    pub async fn lookup(&self, query: &LocationQuery) -> LookupResult {
        let key = CacheKey::derive(query)?;

        if let Some(record) = self.inner.cache.get(&key).await {
            info!(key = %key, "served from cache");
            return Ok(Arc::new(record));
        }

        debug!(key = %key, "cache miss");
        self.flight_for(&key, query).await
    }

    /// Drops the cached record for `query`. Returns whether one was present.
    pub async fn invalidate(&self, query: &LocationQuery) -> Result<bool, LookupError> {
        let key = CacheKey::derive(query)?;
        Ok(self.inner.cache.invalidate(&key).await)
    }

    /// Number of keys with an upstream fetch currently running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Joins the key's running fetch, or starts one
    fn flight_for(&self, key: &CacheKey, query: &LocationQuery) -> Flight {
        let entry = match self.inner.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(key = %key, "joining in-flight fetch");
                return entry.get().clone();
            }
            Entry::Vacant(entry) => entry,
        };

        let (tx, rx) = oneshot::channel();
        let flight: Flight = async move {
            rx.await.unwrap_or_else(|_| {
                Err(LookupError::Unavailable(
                    "lookup task ended without a result".to_string(),
                ))
            })
        }
        .boxed()
        .shared();
        entry.insert(flight.clone());

        let slot = FlightSlot {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        };
        let query = query.clone();
        tokio::spawn(async move {
            let result = slot.inner.fetch_and_populate(&slot.key, &query).await;
            drop(slot);
            // Every waiter may have gone away; the cache is populated regardless
            let _ = tx.send(result);
        });

        flight
    }
}

/// Owns a key's in-flight entry; removing it on drop covers panics too
struct FlightSlot {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for FlightSlot {
    fn drop(&mut self) {
        self.inner.in_flight.remove(&self.key);
    }
}

impl Inner {
    async fn fetch_and_populate(&self, key: &CacheKey, query: &LocationQuery) -> LookupResult {
        // A flight that finished between our miss and our registration may
        // already have filled the key
        if let Some(record) = self.cache.get(key).await {
            debug!(key = %key, "filled by a previous fetch");
            return Ok(Arc::new(record));
        }

        let record = self
            .fetch_with_retry(query)
            .await
            .map_err(|err| LookupError::from_upstream(err, query))?;

        self.cache.set(key, &record, self.policy.ttl).await;
        info!(key = %key, "fetched from upstream");
        Ok(Arc::new(record))
    }

    async fn fetch_with_retry(&self, query: &LocationQuery) -> Result<WeatherRecord, UpstreamError> {
        let attempts = 1 + self.policy.max_retries.min(MAX_RETRIES);
        let mut attempt = 1;
        loop {
            match self.fetch_once(query).await {
                Ok(record) => return Ok(record),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    warn!(query = %query, attempt, error = %err, "upstream fetch failed, retrying");
                    tokio::time::sleep(self.policy.retry_backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(query = %query, attempt, error = %err, "upstream fetch failed");
                    return Err(err);
                }
            }
        }
    }

    async fn fetch_once(&self, query: &LocationQuery) -> Result<WeatherRecord, UpstreamError> {
        tokio::time::timeout(self.policy.fetch_timeout, self.source.fetch(query))
            .await
            .unwrap_or(Err(UpstreamError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(LookupError::Validation(ValidationError::EmptyLocation).is_caller_error());
        assert!(LookupError::NotFound("Atlantis,XX".into()).is_caller_error());
        assert!(!LookupError::Unavailable("timeout".into()).is_caller_error());
    }

    #[test]
    fn test_upstream_error_mapping() {
        let query = LocationQuery::new("Atlantis", "XX");

        assert_eq!(
            LookupError::from_upstream(UpstreamError::NotFound { status: 404 }, &query),
            LookupError::NotFound("Atlantis,XX".to_string())
        );
        assert!(matches!(
            LookupError::from_upstream(UpstreamError::Rejected { status: 401 }, &query),
            LookupError::Unavailable(_)
        ));
        assert!(matches!(
            LookupError::from_upstream(UpstreamError::Timeout, &query),
            LookupError::Unavailable(_)
        ));
    }

    #[test]
    fn test_default_policy() {
        let policy = LookupPolicy::default();
        assert_eq!(policy.ttl, Duration::from_secs(300));
        assert_eq!(policy.max_retries, 1);
    }
}
