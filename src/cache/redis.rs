//! Redis-backed cache store
//!
//! Requires the `redis` feature. Expiry is delegated to Redis (`PSETEX`), so
//! expired keys are never returned.

use std::future::Future;
use std::time::Duration;

use ::redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisError};
use async_trait::async_trait;
use tracing::info;

use super::{CacheError, CacheStore};

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis server hostname
    pub host: String,
    /// Redis server port
    pub port: u16,
    /// Logical database index
    pub db: i64,
    /// Key prefix for all cache keys
    pub prefix: String,
    /// Bound on any single command, including connecting
    pub operation_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            prefix: "weathercache:".to_string(),
            operation_timeout: Duration::from_secs(2),
        }
    }
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Redis-backed cache store sharing one multiplexed connection
pub struct RedisStore {
    conn: MultiplexedConnection,
    config: RedisConfig,
}

impl RedisStore {
    /// Connects to Redis. Fails if the server is unreachable within the timeout.
    pub async fn connect(config: RedisConfig) -> Result<Self, CacheError> {
        let client = Client::open(config.url()).map_err(unavailable)?;
        let conn = tokio::time::timeout(
            config.operation_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Unavailable("timed out connecting to redis".to_string()))?
        .map_err(unavailable)?;

        info!(host = %config.host, port = config.port, "connected to redis");
        Ok(Self { conn, config })
    }

    /// Get prefixed key
    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    /// Runs a command under the operation timeout
    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, RedisError>>,
    ) -> Result<T, CacheError> {
        tokio::time::timeout(self.config.operation_timeout, op)
            .await
            .map_err(|_| CacheError::Unavailable("redis command timed out".to_string()))?
            .map_err(unavailable)
    }
}

fn unavailable(err: RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        let key = self.prefixed_key(key);
        self.bounded(conn.get::<_, Option<Vec<u8>>>(&key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = self.prefixed_key(key);
        // PSETEX rejects a zero expiry; such an entry would be dead on arrival anyway
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return self.bounded(conn.del::<_, ()>(&key)).await;
        }
        self.bounded(conn.pset_ex::<_, _, ()>(&key, value, millis)).await
    }

    async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let key = self.prefixed_key(key);
        let deleted: i64 = self.bounded(conn.del(&key)).await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_local_redis() {
        let config = RedisConfig::default();
        assert_eq!(config.url(), "redis://localhost:6379/0");
        assert_eq!(config.prefix, "weathercache:");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = RedisConfig {
            host: "127.0.0.1".to_string(),
            port,
            operation_timeout: Duration::from_millis(500),
            ..Default::default()
        };

        assert!(matches!(
            RedisStore::connect(config).await,
            Err(CacheError::Unavailable(_))
        ));
    }
}
