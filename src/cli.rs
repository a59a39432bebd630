//! Command-line interface parsing for weathercache
//!
//! Every setting can also come from the environment (and therefore from a
//! `.env` file); the variable names match the ones the original deployment
//! used (`API_KEY`, `BASE_URL`, `CACHE_TIME`, `REDIS_NAME`, `REDIS_PORT`).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::data::weather::OPEN_WEATHER_BASE_URL;
use crate::data::{LocationQuery, ValidationError};

/// Where cached records live
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process only; nothing survives the run
    Memory,
    /// JSON files under the user cache directory
    Disk,
    /// A Redis server (needs the `redis` feature)
    Redis,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

/// weathercache - current weather with a time-bounded cache in front of the provider
#[derive(Parser, Debug)]
#[command(name = "weathercache")]
#[command(about = "Current weather lookups through a TTL cache")]
#[command(version)]
pub struct Cli {
    /// Locations to look up, as City,Country
    ///
    /// Examples:
    ///   weathercache Hyderabad,IN
    ///   weathercache "New York,US" London,GB
    #[arg(value_name = "LOCATION", required = true, value_parser = parse_location_arg)]
    pub locations: Vec<LocationQuery>,

    /// Provider API key
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Provider endpoint for current weather
    #[arg(long, env = "BASE_URL", default_value = OPEN_WEATHER_BASE_URL)]
    pub base_url: String,

    /// How long a fetched record stays cached, in seconds (at most one year)
    #[arg(long, env = "CACHE_TIME", value_name = "SECS", default_value_t = 300)]
    pub cache_time: u64,

    /// Cache backend
    #[arg(long, env = "WEATHERCACHE_BACKEND", value_enum, default_value_t = BackendKind::Disk)]
    pub backend: BackendKind,

    /// Directory for the disk backend (defaults to the user cache directory)
    #[arg(long, env = "WEATHERCACHE_CACHE_DIR", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Redis hostname
    #[arg(long, env = "REDIS_NAME", default_value = "localhost")]
    pub redis_host: String,

    /// Redis port
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    pub redis_port: u16,

    /// Upstream request timeout, in seconds
    #[arg(long = "timeout", env = "WEATHERCACHE_TIMEOUT_SECS", value_name = "SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Pause before retrying a failed upstream call, in milliseconds
    #[arg(long, env = "WEATHERCACHE_RETRY_BACKOFF_MS", value_name = "MS", default_value_t = 250)]
    pub retry_backoff_ms: u64,

    /// Log output format (logs go to stderr; filter with RUST_LOG)
    #[arg(long, env = "WEATHERCACHE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Print records as JSON, one per line
    #[arg(long)]
    pub json: bool,

    /// Run the whole batch of lookups this many times
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub repeat: u32,
}

/// Parses a `City,Country` argument into a LocationQuery.
pub fn parse_location_arg(s: &str) -> Result<LocationQuery, ValidationError> {
    LocationQuery::parse(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location_arg() {
        let query = parse_location_arg("Hyderabad,IN").unwrap();
        assert_eq!(query, LocationQuery::new("Hyderabad", "IN"));
    }

    #[test]
    fn test_parse_location_arg_invalid() {
        let err = parse_location_arg("Hyderabad").unwrap_err();
        assert!(err.to_string().contains("City,Country"));
    }

    #[test]
    fn test_cli_parse_locations() {
        let cli = Cli::parse_from(["weathercache", "Hyderabad,IN", "New York,US"]);
        assert_eq!(
            cli.locations,
            vec![
                LocationQuery::new("Hyderabad", "IN"),
                LocationQuery::new("New York", "US"),
            ]
        );
        assert!(!cli.json);
        assert_eq!(cli.repeat, 1);
    }

    #[test]
    fn test_cli_requires_a_location() {
        assert!(Cli::try_parse_from(["weathercache"]).is_err());
    }

    #[test]
    fn test_cli_rejects_malformed_location() {
        assert!(Cli::try_parse_from(["weathercache", "Hyderabad"]).is_err());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "weathercache",
            "--backend",
            "memory",
            "--cache-time",
            "60",
            "--timeout",
            "3",
            "--repeat",
            "2",
            "--json",
            "--api-key",
            "k",
            "Hyderabad,IN",
        ]);
        assert_eq!(cli.backend, BackendKind::Memory);
        assert_eq!(cli.cache_time, 60);
        assert_eq!(cli.timeout_secs, 3);
        assert_eq!(cli.repeat, 2);
        assert!(cli.json);
        assert_eq!(cli.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_cli_repeat_out_of_range() {
        assert!(Cli::try_parse_from(["weathercache", "--repeat", "0", "Hyderabad,IN"]).is_err());
    }
}
