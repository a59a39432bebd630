//! weathercache library
//!
//! A cache-aside lookup service for current weather: `lookup::WeatherService`
//! consults a TTL cache (`cache`) and, on a miss, fetches from the provider
//! (`data::weather`) with per-key request coalescing.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod lookup;
pub mod telemetry;

pub use cache::{CacheStore, RecordCache};
pub use data::{CacheKey, LocationQuery, WeatherRecord, WeatherSource};
pub use lookup::{LookupError, LookupPolicy, WeatherService};
