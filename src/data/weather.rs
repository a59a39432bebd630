//! OpenWeather current-conditions client
//!
//! This module fetches current weather from an OpenWeather-compatible endpoint
//! and normalizes the response into a `WeatherRecord`. Every field is read
//! defensively: a missing or mistyped field becomes `None` on its own and never
//! turns into a zero reading or aborts the parse.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::{LocationQuery, WeatherCondition, WeatherRecord};

/// Base URL for the OpenWeather current weather API
pub const OPEN_WEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Upper bound on establishing the TCP/TLS connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur when fetching weather data
///
/// Variants are split by whether repeating the same request could succeed;
/// see [`UpstreamError::is_retryable`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The request did not complete within the configured timeout
    #[error("upstream request timed out")]
    Timeout,

    /// The connection could not be established
    #[error("could not connect to upstream: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// HTTP 429
    #[error("upstream rate limit exceeded")]
    RateLimited,

    /// HTTP 5xx
    #[error("upstream server error (HTTP {status})")]
    Server { status: u16 },

    /// The provider does not know the requested location
    #[error("location not found (HTTP {status})")]
    NotFound { status: u16 },

    /// The provider refused the request (bad credential, forbidden, ...)
    #[error("upstream rejected the request (HTTP {status})")]
    Rejected { status: u16 },

    /// A success response whose body is not a JSON object
    #[error("upstream returned an unusable body: {0}")]
    InvalidBody(String),
}

impl UpstreamError {
    /// Whether a repeat of the same request could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout
                | UpstreamError::Connect(_)
                | UpstreamError::Transport(_)
                | UpstreamError::RateLimited
                | UpstreamError::Server { .. }
        )
    }

    /// Classifies a non-success HTTP status. Returns `None` for 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        if status.is_success() {
            return None;
        }
        let code = status.as_u16();
        Some(match status {
            StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited,
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => UpstreamError::NotFound { status: code },
            s if s.is_server_error() => UpstreamError::Server { status: code },
            _ => UpstreamError::Rejected { status: code },
        })
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_connect() {
            UpstreamError::Connect(err.to_string())
        } else if err.is_decode() {
            UpstreamError::InvalidBody(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

/// A source of current weather for a location
///
/// The lookup service only talks to this trait, so tests can substitute a
/// call-counting fake for the HTTP client.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Issues a single request for the location's current weather.
    async fn fetch(&self, query: &LocationQuery) -> Result<WeatherRecord, UpstreamError>;
}

/// Client for fetching weather data from the OpenWeather API
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    /// Creates a client whose requests give up after `timeout`
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(CONNECT_TIMEOUT))
            .build()?;
        Ok(Self::with_client(client, api_key))
    }

    /// Create a new OpenWeatherClient with a custom HTTP client
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: OPEN_WEATHER_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Points the client at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch(&self, query: &LocationQuery) -> Result<WeatherRecord, UpstreamError> {
        let q = query.provider_query();
        debug!(q = %q, "requesting current weather");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", q.as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await?;

        if let Some(err) = UpstreamError::from_status(response.status()) {
            return Err(err);
        }

        let text = response.text().await?;
        parse_response(&text, query)
    }
}

/// Parse an OpenWeather response body into a WeatherRecord
pub fn parse_response(body: &str, query: &LocationQuery) -> Result<WeatherRecord, UpstreamError> {
    let raw: Value =
        serde_json::from_str(body).map_err(|e| UpstreamError::InvalidBody(e.to_string()))?;
    if !raw.is_object() {
        return Err(UpstreamError::InvalidBody("expected a JSON object".to_string()));
    }

    let response: OpenWeatherResponse =
        serde_json::from_value(raw).map_err(|e| UpstreamError::InvalidBody(e.to_string()))?;

    // Some proxies answer 200 and carry the real status in `cod`
    if let Some(status) = response.cod.and_then(|c| StatusCode::from_u16(c).ok()) {
        if let Some(err) = UpstreamError::from_status(status) {
            return Err(err);
        }
    }

    let main = response.main.unwrap_or_default();
    let condition = response
        .weather
        .unwrap_or_default()
        .into_iter()
        .next()
        .unwrap_or_default();

    let name = response
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| query.display_location());

    Ok(WeatherRecord {
        name,
        country: response.sys.and_then(|s| s.country),
        temperature: main.temp,
        feels_like: main.feels_like,
        humidity: main.humidity,
        pressure: main.pressure,
        wind_speed: response.wind.and_then(|w| w.speed),
        clouds: response.clouds.and_then(|c| c.all),
        timezone_offset: response.timezone,
        condition: condition
            .id
            .map(condition_from_code)
            .unwrap_or(WeatherCondition::Unknown),
        description: condition.description,
        observed_at: response.dt.and_then(|dt| DateTime::from_timestamp(dt, 0)),
        fetched_at: Utc::now(),
    })
}

/// Map an OpenWeather condition id to WeatherCondition
///
/// Condition groups:
/// - 2xx: Thunderstorm
/// - 3xx: Drizzle
/// - 5xx: Rain
/// - 6xx: Snow
/// - 7xx: Atmosphere (mist, smoke, haze, fog, ...)
/// - 800: Clear
/// - 801-802: Few/scattered clouds
/// - 803-804: Broken/overcast clouds
pub fn condition_from_code(code: u16) -> WeatherCondition {
    match code {
        200..=299 => WeatherCondition::Thunderstorm,
        300..=399 => WeatherCondition::Drizzle,
        500..=599 => WeatherCondition::Rain,
        600..=699 => WeatherCondition::Snow,
        700..=799 => WeatherCondition::Fog,
        800 => WeatherCondition::Clear,
        801..=802 => WeatherCondition::PartlyCloudy,
        803..=804 => WeatherCondition::Cloudy,
        _ => WeatherCondition::Unknown,
    }
}

/// Deserializes a field, yielding `None` instead of an error on a type mismatch
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Percentages arrive as integers but some mirrors send floats
fn lenient_percent<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .filter(|v| (0.0..=100.0).contains(v))
        .map(|v| v.round() as u8))
}

/// `cod` is a number on success and a string on errors
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// OpenWeather API response structure
#[derive(Debug, Default, Deserialize)]
struct OpenWeatherResponse {
    #[serde(default, deserialize_with = "lenient_code")]
    cod: Option<u16>,
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    main: Option<MainBlock>,
    #[serde(default, deserialize_with = "lenient")]
    wind: Option<WindBlock>,
    #[serde(default, deserialize_with = "lenient")]
    clouds: Option<CloudsBlock>,
    #[serde(default, deserialize_with = "lenient")]
    sys: Option<SysBlock>,
    #[serde(default, deserialize_with = "lenient")]
    weather: Option<Vec<ConditionBlock>>,
    #[serde(default, deserialize_with = "lenient")]
    timezone: Option<i32>,
    #[serde(default, deserialize_with = "lenient")]
    dt: Option<i64>,
}

/// Core measurements
#[derive(Debug, Default, Deserialize)]
struct MainBlock {
    #[serde(default, deserialize_with = "lenient")]
    temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    feels_like: Option<f64>,
    #[serde(default, deserialize_with = "lenient_percent")]
    humidity: Option<u8>,
    #[serde(default, deserialize_with = "lenient")]
    pressure: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct WindBlock {
    #[serde(default, deserialize_with = "lenient")]
    speed: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CloudsBlock {
    #[serde(default, deserialize_with = "lenient_percent")]
    all: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct SysBlock {
    #[serde(default, deserialize_with = "lenient")]
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConditionBlock {
    #[serde(default, deserialize_with = "lenient")]
    id: Option<u16>,
    #[serde(default, deserialize_with = "lenient")]
    description: Option<String>,
}
