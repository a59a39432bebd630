//! Validated service settings
//!
//! Built once at startup from the parsed command line, then used to construct
//! the shared cache backend, the upstream client and the lookup policy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheStore, DiskStore, MemoryStore};
use crate::cli::{BackendKind, Cli};
use crate::data::OpenWeatherClient;
use crate::lookup::LookupPolicy;

/// Longest accepted `CACHE_TIME`: one year
pub const MAX_CACHE_TIME_SECS: u64 = 365 * 24 * 60 * 60;

/// Longest accepted upstream timeout: one hour
pub const MAX_TIMEOUT_SECS: u64 = 60 * 60;

/// Errors that prevent the service from starting
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key configured; set API_KEY or pass --api-key")]
    MissingApiKey,

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must be at most {max} seconds")]
    TooLarge { name: &'static str, max: u64 },

    #[error("no cache directory available; pass --cache-dir")]
    NoCacheDir,

    #[error("the redis backend requires building with `--features redis`")]
    RedisUnsupported,

    #[error("could not build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Which cache backend to open, with its connection details
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSettings {
    Memory,
    Disk { dir: Option<PathBuf> },
    Redis { host: String, port: u16 },
}

/// Settings for one service instance
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub base_url: Url,
    pub ttl: Duration,
    pub timeout: Duration,
    pub retry_backoff: Duration,
    pub backend: BackendSettings,
}

impl ServiceConfig {
    /// Validates the command line into service settings.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let api_key = cli
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?
            .to_string();

        let base_url = Url::parse(&cli.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: cli.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: cli.base_url.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        if cli.cache_time == 0 {
            return Err(ConfigError::Zero("CACHE_TIME"));
        }
        if cli.cache_time > MAX_CACHE_TIME_SECS {
            return Err(ConfigError::TooLarge {
                name: "CACHE_TIME",
                max: MAX_CACHE_TIME_SECS,
            });
        }
        if cli.timeout_secs == 0 {
            return Err(ConfigError::Zero("timeout"));
        }
        if cli.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::TooLarge {
                name: "timeout",
                max: MAX_TIMEOUT_SECS,
            });
        }

        let backend = match cli.backend {
            BackendKind::Memory => BackendSettings::Memory,
            BackendKind::Disk => BackendSettings::Disk {
                dir: cli.cache_dir.clone(),
            },
            BackendKind::Redis => BackendSettings::Redis {
                host: cli.redis_host.clone(),
                port: cli.redis_port,
            },
        };

        Ok(Self {
            api_key,
            base_url,
            ttl: Duration::from_secs(cli.cache_time),
            timeout: Duration::from_secs(cli.timeout_secs),
            retry_backoff: Duration::from_millis(cli.retry_backoff_ms),
            backend,
        })
    }

    pub fn lookup_policy(&self) -> LookupPolicy {
        LookupPolicy {
            ttl: self.ttl,
            fetch_timeout: self.timeout,
            retry_backoff: self.retry_backoff,
            ..LookupPolicy::default()
        }
    }

    pub fn upstream_client(&self) -> Result<OpenWeatherClient, ConfigError> {
        Ok(OpenWeatherClient::new(&self.api_key, self.timeout)?.with_base_url(self.base_url.as_str()))
    }

    /// Opens the configured cache backend.
    ///
    /// An unreachable Redis server does not stop the service: lookups fall
    /// back to an in-process cache for this run.
    pub async fn open_store(&self) -> Result<Arc<dyn CacheStore>, ConfigError> {
        match &self.backend {
            BackendSettings::Memory => Ok(Arc::new(MemoryStore::new())),
            BackendSettings::Disk { dir } => {
                let store = match dir {
                    Some(dir) => DiskStore::with_dir(dir.clone()),
                    None => DiskStore::new().ok_or(ConfigError::NoCacheDir)?,
                };
                info!(dir = %store.cache_dir().display(), "using disk cache");
                Ok(Arc::new(store))
            }
            BackendSettings::Redis { host, port } => self.open_redis(host, *port).await,
        }
    }

    #[cfg(feature = "redis")]
    async fn open_redis(&self, host: &str, port: u16) -> Result<Arc<dyn CacheStore>, ConfigError> {
        use crate::cache::{RedisConfig, RedisStore};

        let config = RedisConfig {
            host: host.to_string(),
            port,
            ..RedisConfig::default()
        };
        match RedisStore::connect(config).await {
            Ok(store) => Ok(Arc::new(store)),
            Err(err) => {
                warn!(error = %err, "redis unavailable, caching in memory for this run");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    async fn open_redis(&self, host: &str, port: u16) -> Result<Arc<dyn CacheStore>, ConfigError> {
        warn!(host, port, "redis backend requested but not compiled in");
        Err(ConfigError::RedisUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["weathercache", "--api-key", "secret"];
        argv.extend_from_slice(args);
        argv.push("Hyderabad,IN");
        Cli::parse_from(argv)
    }

    #[test]
    fn test_from_cli() {
        let config = ServiceConfig::from_cli(&cli(&[
            "--backend",
            "memory",
            "--cache-time",
            "300",
            "--base-url",
            "http://127.0.0.1:8080/weather",
        ]))
        .unwrap();

        assert_eq!(config.api_key, "secret");
        assert_eq!(config.ttl, Duration::from_secs(300));
        assert_eq!(config.backend, BackendSettings::Memory);
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:8080/weather");

        let policy = config.lookup_policy();
        assert_eq!(policy.ttl, Duration::from_secs(300));
        assert_eq!(policy.max_retries, 1);
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let cli = Cli::parse_from(["weathercache", "--api-key", "  ", "Hyderabad,IN"]);
        assert!(matches!(
            ServiceConfig::from_cli(&cli),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        assert!(matches!(
            ServiceConfig::from_cli(&cli(&["--cache-time", "0"])),
            Err(ConfigError::Zero("CACHE_TIME"))
        ));
    }

    #[test]
    fn test_absurd_ttl_rejected() {
        let max = MAX_CACHE_TIME_SECS.to_string();
        let config = ServiceConfig::from_cli(&cli(&["--cache-time", &max])).unwrap();
        assert_eq!(config.ttl, Duration::from_secs(MAX_CACHE_TIME_SECS));

        let over = (MAX_CACHE_TIME_SECS + 1).to_string();
        assert!(matches!(
            ServiceConfig::from_cli(&cli(&["--cache-time", &over])),
            Err(ConfigError::TooLarge { name: "CACHE_TIME", .. })
        ));
        assert!(matches!(
            ServiceConfig::from_cli(&cli(&["--cache-time", "18446744073709551615"])),
            Err(ConfigError::TooLarge { name: "CACHE_TIME", .. })
        ));
    }

    #[test]
    fn test_absurd_timeout_rejected() {
        assert!(matches!(
            ServiceConfig::from_cli(&cli(&["--timeout", "86400"])),
            Err(ConfigError::TooLarge { name: "timeout", .. })
        ));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        assert!(matches!(
            ServiceConfig::from_cli(&cli(&["--base-url", "not a url"])),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
        assert!(matches!(
            ServiceConfig::from_cli(&cli(&["--base-url", "ftp://example.com/weather"])),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_disk_store_in_custom_dir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let dir = temp_dir.path().to_string_lossy().into_owned();
        let config =
            ServiceConfig::from_cli(&cli(&["--backend", "disk", "--cache-dir", &dir])).unwrap();

        let store = config.open_store().await.unwrap();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_without_feature_is_an_error() {
        let config = ServiceConfig::from_cli(&cli(&["--backend", "redis"])).unwrap();
        assert!(matches!(
            config.open_store().await,
            Err(ConfigError::RedisUnsupported)
        ));
    }
}
