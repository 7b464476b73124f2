//! Reverse geocoding: turn coordinates into the display title.
//! Uses geocode.maps.co, which requires an API key.

use crate::types::Location;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use weatherhist_core::GeocodeConfig;

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    address: Option<ReverseAddress>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseAddress {
    city: Option<String>,
    city_district: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

/// Reverse geocoding client.
#[derive(Debug, Clone)]
pub struct Geocoder {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Geocoder {
    /// Build a geocoder; `None` if the HTTP client cannot be created.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Option<Self> {
        let client = match Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Failed to create geocoding client: {}", e);
                return None;
            }
        };

        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build a geocoder from configuration; `None` without an API key.
    pub fn from_config(config: &GeocodeConfig) -> Option<Self> {
        let api_key = match config.api_key() {
            Ok(k) => k,
            Err(e) => {
                tracing::warn!("Reverse geocoding disabled: {}", e);
                return None;
            }
        };
        Self::new(
            &config.base_url,
            &api_key,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Reverse geocode coordinates to "place, country".
    /// Returns `None` on failure; the caller can fall back to coordinates.
    pub async fn reverse_geocode(&self, location: &Location) -> Option<String> {
        let url = format!("{}/reverse", self.base_url);

        let response = match self
            .client
            .get(&url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("api_key", self.api_key.clone()),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Reverse geocode request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Reverse geocode returned status {}", response.status());
            return None;
        }

        let body: ReverseResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Reverse geocode parse error: {}", e);
                return None;
            }
        };

        if let Some(error) = body.error {
            tracing::debug!("Reverse geocode error: {}", error);
            return None;
        }

        let addr = body.address?;
        let place = addr.city.or(addr.city_district).or(addr.state);
        let parts: Vec<String> = place.into_iter().chain(addr.country).collect();

        if parts.is_empty() {
            return None;
        }

        let result = parts.join(", ");
        tracing::info!("Reverse geocoded to: {}", result);
        Some(result)
    }
}

/// Display title for a location: place name when available, else coordinates.
pub async fn location_title(geocoder: Option<&Geocoder>, location: &Location) -> String {
    match geocoder {
        Some(g) => g
            .reverse_geocode(location)
            .await
            .unwrap_or_else(|| location.coordinates_label()),
        None => location.coordinates_label(),
    }
}
