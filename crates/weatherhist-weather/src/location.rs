//! Location tracking: resolve the position once per session and invalidate
//! cached weather data whenever it differs from the last known one.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use weatherhist_core::{Config, LocationConfig};

use crate::types::{Location, LocationError};

/// Client-state key holding the last known location.
pub const LOCATION_STATE_KEY: &str = "weather-history-geoposition";

/// A single geolocation request.
pub trait GeolocationSource {
    fn current_position(&self) -> impl Future<Output = Result<Location, LocationError>> + Send;
}

/// Something holding data that becomes stale when the location changes.
pub trait CacheInvalidator {
    type Error: std::fmt::Display;

    fn invalidate(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Position taken from configuration; unavailable when not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredPosition {
    position: Option<Location>,
}

impl ConfiguredPosition {
    pub fn new(position: Option<Location>) -> Self {
        Self { position }
    }

    pub fn from_config(config: &LocationConfig) -> Self {
        let position = match (config.latitude, config.longitude) {
            (Some(lat), Some(lon)) => Some(Location::new(lat, lon)),
            _ => None,
        };
        Self { position }
    }
}

impl GeolocationSource for ConfiguredPosition {
    async fn current_position(&self) -> Result<Location, LocationError> {
        self.position.ok_or(LocationError::ServiceUnavailable)
    }
}

/// Durable client-side key-value storage backed by a JSON object file.
#[derive(Debug, Clone)]
pub struct ClientState {
    path: PathBuf,
}

impl ClientState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, serde_json::Value>, LocationError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| LocationError::Storage(e.to_string()))?;

        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                tracing::warn!("Ignoring unreadable client state {}: {}", self.path.display(), e);
                Ok(HashMap::new())
            }
        }
    }

    /// Read one entry; malformed entries read as absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LocationError> {
        let mut map = self.read_all()?;
        let Some(value) = map.remove(key) else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!("Ignoring malformed client state entry '{}': {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), LocationError> {
        let mut map = self.read_all()?;
        let value = serde_json::to_value(value).map_err(|e| LocationError::Storage(e.to_string()))?;
        map.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LocationError::Storage(e.to_string()))?;
        }
        let contents =
            serde_json::to_string_pretty(&map).map_err(|e| LocationError::Storage(e.to_string()))?;
        std::fs::write(&self.path, contents).map_err(|e| LocationError::Storage(e.to_string()))
    }
}

/// Resolves the session location and invalidates the cache on change.
#[derive(Debug, Clone)]
pub struct LocationTracker {
    state: ClientState,
    fallback: Location,
}

impl LocationTracker {
    pub fn new(state: ClientState, fallback: Location) -> Self {
        Self { state, fallback }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ClientState::new(config.client_state_path()),
            Location::new(
                config.location.fallback_latitude,
                config.location.fallback_longitude,
            ),
        )
    }

    /// The last persisted location, if any.
    pub fn last_known(&self) -> Option<Location> {
        match self.state.get(LOCATION_STATE_KEY) {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!("Failed to read last known location: {}", e);
                None
            }
        }
    }

    /// Resolve the current location.
    ///
    /// Falls back to the configured location when the source fails. If the
    /// result differs from the last known location (or none is stored), the
    /// invalidator runs before the new location is persisted.
    ///
    /// # Errors
    ///
    /// [`LocationError::Invalidation`] if clearing cached data failed (the new
    /// location is then not persisted), [`LocationError::Storage`] if the
    /// location could not be written.
    pub async fn resolve<S, I>(&self, source: &S, invalidator: &I) -> Result<Location, LocationError>
    where
        S: GeolocationSource,
        I: CacheInvalidator,
    {
        let location = match source.current_position().await {
            Ok(loc) => {
                tracing::info!("Got location: {}, {}", loc.latitude, loc.longitude);
                loc
            }
            Err(e) => {
                tracing::warn!(
                    "Location unavailable ({}), using fallback {}",
                    e,
                    self.fallback.coordinates_label()
                );
                self.fallback
            }
        };

        if self.last_known() != Some(location) {
            tracing::info!("Location changed, invalidating cached weather data");
            invalidator
                .invalidate()
                .await
                .map_err(|e| LocationError::Invalidation(e.to_string()))?;
        }

        self.state.set(LOCATION_STATE_KEY, &location)?;
        Ok(location)
    }
}
