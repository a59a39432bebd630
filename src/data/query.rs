//! Lookup parameters and cache key derivation
//!
//! A `LocationQuery` is what a caller asks for; a `CacheKey` is the normalized,
//! byte-stable form of that query used to address the cache and the in-flight
//! fetch table.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix shared by every weather cache key
const KEY_PREFIX: &str = "weather";

/// Longest accepted location name, in characters
const MAX_LOCATION_CHARS: usize = 100;

/// Longest accepted region, in characters ("The United Kingdom of Great Britain..." fits)
const MAX_REGION_CHARS: usize = 56;

/// Reasons a lookup request is rejected before touching cache or upstream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The input did not have the `City,Country` shape
    #[error("expected `City,Country` (e.g. Hyderabad,IN), got '{0}'")]
    Malformed(String),

    /// The location part was empty after trimming
    #[error("location must not be empty")]
    EmptyLocation,

    /// The region part was empty after trimming
    #[error("region must not be empty")]
    EmptyRegion,

    /// A field exceeded its length limit
    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },

    /// A field contained characters that cannot appear in a place name
    #[error("{field} contains invalid characters: '{value}'")]
    InvalidCharacters { field: &'static str, value: String },
}

/// A request for the current weather at a location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationQuery {
    /// City or place name, as typed by the caller
    pub location: String,
    /// Country name or ISO 3166 code, as typed by the caller
    pub region: String,
}

impl LocationQuery {
    pub fn new(location: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            region: region.into(),
        }
    }

    /// Parses the `City,Country` form, splitting on the first comma.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let (location, region) = input
            .split_once(',')
            .ok_or_else(|| ValidationError::Malformed(input.to_string()))?;
        let query = Self::new(location.trim(), region.trim());
        query.validate()?;
        Ok(query)
    }

    /// Checks both fields without normalizing them.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let location = normalize(&self.location);
        let region = normalize(&self.region);

        if location.is_empty() {
            return Err(ValidationError::EmptyLocation);
        }
        if region.is_empty() {
            return Err(ValidationError::EmptyRegion);
        }
        if location.chars().count() > MAX_LOCATION_CHARS {
            return Err(ValidationError::TooLong {
                field: "location",
                max: MAX_LOCATION_CHARS,
            });
        }
        if region.chars().count() > MAX_REGION_CHARS {
            return Err(ValidationError::TooLong {
                field: "region",
                max: MAX_REGION_CHARS,
            });
        }
        if location.chars().any(|c| c.is_control() || c == ',') {
            return Err(ValidationError::InvalidCharacters {
                field: "location",
                value: self.location.clone(),
            });
        }
        if !region
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '.')
        {
            return Err(ValidationError::InvalidCharacters {
                field: "region",
                value: self.region.clone(),
            });
        }
        Ok(())
    }

    /// Value sent to the provider's `q` parameter
    pub fn provider_query(&self) -> String {
        format!("{},{}", normalize(&self.location), normalize(&self.region))
    }

    /// Location name with whitespace normalized but case preserved
    pub fn display_location(&self) -> String {
        self.location.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl fmt::Display for LocationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.location.trim(), self.region.trim())
    }
}

/// Normalized key addressing one location in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a query, rejecting malformed input.
    ///
    /// Case and whitespace variants of the same place map to the same key.
    pub fn derive(query: &LocationQuery) -> Result<Self, ValidationError> {
        query.validate()?;
        Ok(Self(format!(
            "{}:{},{}",
            KEY_PREFIX,
            normalize(&query.location),
            normalize(&query.region)
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims, collapses whitespace runs to a single space, and lowercases
fn normalize(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
