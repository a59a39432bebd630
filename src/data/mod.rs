//! Core data models for weathercache
//!
//! This module contains the normalized weather record shared by the upstream
//! client, the cache, and the lookup service, plus the lookup parameters.

pub mod query;
pub mod weather;

pub use query::{CacheKey, LocationQuery, ValidationError};
pub use weather::{OpenWeatherClient, UpstreamError, WeatherSource};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current weather for one location, in a provider-independent shape
///
/// Every measurement is optional: `None` means the provider did not report
/// it, which is distinct from a reported zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Place name as reported by the provider
    pub name: String,
    /// ISO 3166 country code reported by the provider
    pub country: Option<String>,
    /// Temperature in Celsius
    pub temperature: Option<f64>,
    /// Feels-like temperature in Celsius
    pub feels_like: Option<f64>,
    /// Relative humidity percentage (0-100)
    pub humidity: Option<u8>,
    /// Sea-level pressure in hPa
    pub pressure: Option<f64>,
    /// Wind speed in m/s
    pub wind_speed: Option<f64>,
    /// Cloud cover percentage (0-100)
    pub clouds: Option<u8>,
    /// Offset of local time from UTC, in seconds
    pub timezone_offset: Option<i32>,
    /// Current weather condition
    pub condition: WeatherCondition,
    /// Provider's free-text description (e.g. "light rain")
    pub description: Option<String>,
    /// When the provider observed these conditions
    pub observed_at: Option<DateTime<Utc>>,
    /// When this data was fetched
    pub fetched_at: DateTime<Utc>,
}

/// Types of weather conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Drizzle,
    Rain,
    Thunderstorm,
    Snow,
    Fog,
    /// The provider did not report a condition, or reported one we don't know
    Unknown,
}

impl fmt::Display for WeatherCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WeatherCondition::Clear => "clear",
            WeatherCondition::PartlyCloudy => "partly cloudy",
            WeatherCondition::Cloudy => "cloudy",
            WeatherCondition::Drizzle => "drizzle",
            WeatherCondition::Rain => "rain",
            WeatherCondition::Thunderstorm => "thunderstorm",
            WeatherCondition::Snow => "snow",
            WeatherCondition::Fog => "fog",
            WeatherCondition::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Formats an optional reading, printing `unknown` when absent
struct Reading<'a, T>(&'a Option<T>, &'a str);

impl<T: fmt::Display> fmt::Display for Reading<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{}{}", value, self.1),
            None => f.write_str("unknown"),
        }
    }
}

impl fmt::Display for WeatherRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.country {
            Some(country) => writeln!(f, "{}, {}", self.name, country)?,
            None => writeln!(f, "{}", self.name)?,
        }
        match &self.description {
            Some(description) => writeln!(f, "  condition:   {} ({})", self.condition, description)?,
            None => writeln!(f, "  condition:   {}", self.condition)?,
        }
        writeln!(f, "  temperature: {}", Reading(&self.temperature, " °C"))?;
        writeln!(f, "  feels like:  {}", Reading(&self.feels_like, " °C"))?;
        writeln!(f, "  humidity:    {}", Reading(&self.humidity, "%"))?;
        writeln!(f, "  pressure:    {}", Reading(&self.pressure, " hPa"))?;
        writeln!(f, "  wind:        {}", Reading(&self.wind_speed, " m/s"))?;
        writeln!(f, "  clouds:      {}", Reading(&self.clouds, "%"))?;
        write!(f, "  utc offset:  {}", Reading(&self.timezone_offset, " s"))
    }
}

#[cfg(test)]
pub(crate) fn sample_record(name: &str) -> WeatherRecord {
    WeatherRecord {
        name: name.to_string(),
        country: Some("IN".to_string()),
        temperature: Some(30.1),
        feels_like: None,
        humidity: Some(65),
        pressure: None,
        wind_speed: Some(0.0),
        clouds: None,
        timezone_offset: Some(19800),
        condition: WeatherCondition::Clear,
        description: Some("clear sky".to_string()),
        observed_at: None,
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_is_distinct_from_zero() {
        let record = sample_record("Hyderabad");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["wind_speed"], serde_json::json!(0.0));
        assert!(json["feels_like"].is_null());

        let back: WeatherRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.wind_speed, Some(0.0));
        assert_eq!(back.feels_like, None);
    }

    #[test]
    fn test_display_marks_missing_readings_unknown() {
        let text = sample_record("Hyderabad").to_string();

        assert!(text.starts_with("Hyderabad, IN\n"));
        assert!(text.contains("condition:   clear (clear sky)"));
        assert!(text.contains("temperature: 30.1 °C"));
        assert!(text.contains("feels like:  unknown"));
        assert!(text.contains("wind:        0 m/s"));
        assert!(text.contains("clouds:      unknown"));
    }

    #[test]
    fn test_weather_condition_variants() {
        let conditions = [
            WeatherCondition::Clear,
            WeatherCondition::PartlyCloudy,
            WeatherCondition::Cloudy,
            WeatherCondition::Drizzle,
            WeatherCondition::Rain,
            WeatherCondition::Thunderstorm,
            WeatherCondition::Snow,
            WeatherCondition::Fog,
            WeatherCondition::Unknown,
        ];

        // Verify all variants render distinct labels
        for (i, cond1) in conditions.iter().enumerate() {
            for (j, cond2) in conditions.iter().enumerate() {
                if i == j {
                    assert_eq!(cond1.to_string(), cond2.to_string());
                } else {
                    assert_ne!(cond1.to_string(), cond2.to_string());
                }
            }
        }
    }
}
