//! Geocoder port and an offline implementation backed by recorded responses.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::GroundGameError;
use crate::models::Coordinates;

/// Failures reported by a geocoding provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeocodeError {
    #[error("no result")]
    NotFound,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

impl From<GeocodeError> for GroundGameError {
    fn from(err: GeocodeError) -> Self {
        GroundGameError::GeocodeUnavailable(err.to_string())
    }
}

/// Street address submitted for forward verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreetAddress {
    pub street_1: String,
    pub street_2: Option<String>,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub zip_code: Option<String>,
}

/// Postal-authority normalized address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedAddress {
    pub verified_street_1: String,
    pub verified_street_2: String,
    pub verified_city: String,
    pub verified_state: String,
    pub verified_zip: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Snap device coordinates to the canonical place
    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Coordinates, GeocodeError>;

    /// Normalize a street address against the postal authority
    async fn forward_verify(&self, address: &StreetAddress) -> Result<VerifiedAddress, GeocodeError>;
}

/// Wraps a geocoder so that slow provider calls fail fast.
pub struct TimeoutGeocoder<G> {
    inner: G,
    timeout: Duration,
}

impl<G: Geocoder> TimeoutGeocoder<G> {
    pub const fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for TimeoutGeocoder<G> {
    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Coordinates, GeocodeError> {
        tokio::time::timeout(self.timeout, self.inner.reverse_geocode(coordinates))
            .await
            .map_err(|_| GeocodeError::Timeout(self.timeout_ms()))?
    }

    async fn forward_verify(&self, address: &StreetAddress) -> Result<VerifiedAddress, GeocodeError> {
        tokio::time::timeout(self.timeout, self.inner.forward_verify(address))
            .await
            .map_err(|_| GeocodeError::Timeout(self.timeout_ms()))?
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReverseFixture {
    pub latitude: f64,
    pub longitude: f64,
    pub corrected_latitude: f64,
    pub corrected_longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyFixture {
    pub street_1: String,
    #[serde(default)]
    pub city: Option<String>,
    pub result: VerifiedAddress,
}

/// Recorded geocoder responses
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeocoderFixtures {
    #[serde(default)]
    pub reverse: Vec<ReverseFixture>,
    #[serde(default)]
    pub verify: Vec<VerifyFixture>,
}

/// Offline geocoder that replays recorded responses.
///
/// Reverse lookups match coordinates exactly; forward verification matches
/// `street_1` case-insensitively and, when the fixture names a city, the city
/// as well.
#[derive(Debug, Clone, Default)]
pub struct FixtureGeocoder {
    fixtures: GeocoderFixtures,
}

impl FixtureGeocoder {
    #[must_use]
    pub const fn new(fixtures: GeocoderFixtures) -> Self {
        Self { fixtures }
    }

    /// Load fixtures from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, GroundGameError> {
        let contents = std::fs::read_to_string(path)?;
        let fixtures: GeocoderFixtures = serde_json::from_str(&contents)?;
        tracing::debug!(
            path = %path.display(),
            reverse = fixtures.reverse.len(),
            verify = fixtures.verify.len(),
            "Loaded geocoder fixtures"
        );
        Ok(Self::new(fixtures))
    }

    #[must_use]
    pub fn with_reverse(mut self, submitted: Coordinates, corrected: Coordinates) -> Self {
        self.fixtures.reverse.push(ReverseFixture {
            latitude: submitted.latitude,
            longitude: submitted.longitude,
            corrected_latitude: corrected.latitude,
            corrected_longitude: corrected.longitude,
        });
        self
    }

    #[must_use]
    pub fn with_verify(mut self, street_1: &str, result: VerifiedAddress) -> Self {
        self.fixtures.verify.push(VerifyFixture {
            street_1: street_1.to_string(),
            city: None,
            result,
        });
        self
    }
}

#[async_trait]
impl Geocoder for FixtureGeocoder {
    #[allow(clippy::float_cmp)]
    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Coordinates, GeocodeError> {
        self.fixtures
            .reverse
            .iter()
            .find(|f| f.latitude == coordinates.latitude && f.longitude == coordinates.longitude)
            .map(|f| Coordinates::new(f.corrected_latitude, f.corrected_longitude))
            .ok_or(GeocodeError::NotFound)
    }

    async fn forward_verify(&self, address: &StreetAddress) -> Result<VerifiedAddress, GeocodeError> {
        self.fixtures
            .verify
            .iter()
            .find(|f| {
                f.street_1.eq_ignore_ascii_case(&address.street_1)
                    && f.city.as_ref().map_or(true, |city| {
                        address
                            .city
                            .as_ref()
                            .is_some_and(|c| c.eq_ignore_ascii_case(city))
                    })
            })
            .map(|f| f.result.clone())
            .ok_or(GeocodeError::NotFound)
    }
}
