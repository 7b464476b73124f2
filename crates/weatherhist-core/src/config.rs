use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;

/// Directory name used under the platform config and data directories.
const APP_DIR_NAME: &str = "weatherhist";

/// Environment variable consulted when no geocoding API key is configured.
pub const GEOCODE_API_KEY_ENV: &str = "WEATHERHIST_GEOCODE_API_KEY";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory (also holds client state)
    pub config_dir: PathBuf,

    /// Weather archive endpoint
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Reverse geocoding used for the display title
    #[serde(default)]
    pub geocode: GeocodeConfig,

    /// Location source and fallback
    #[serde(default)]
    pub location: LocationConfig,

    /// Selectable and default year ranges
    #[serde(default)]
    pub years: YearsConfig,

    /// Local cache database
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the Open-Meteo archive service
    pub base_url: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://archive-api.open-meteo.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeConfig {
    /// Base URL of the reverse geocoding service
    pub base_url: String,

    /// API key; when absent the `WEATHERHIST_GEOCODE_API_KEY` variable is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_geocode_timeout")]
    pub timeout_secs: u64,
}

fn default_geocode_timeout() -> u64 {
    10
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://geocode.maps.co".to_string(),
            api_key: None,
            timeout_secs: default_geocode_timeout(),
        }
    }
}

impl GeocodeConfig {
    /// The configured API key, falling back to the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSetting`] if neither source provides a key.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(GEOCODE_API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSetting("geocode.api_key".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Fixed latitude reported as the device position (unset = unavailable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    /// Fixed longitude reported as the device position (unset = unavailable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,

    /// Used when the position cannot be resolved (St. Petersburg)
    pub fallback_latitude: f64,
    pub fallback_longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: None,
            longitude: None,
            fallback_latitude: 59.57,
            fallback_longitude: 30.19,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YearsConfig {
    /// First year offered by the archive
    pub min_year: i32,
    /// Last year offered
    pub max_year: i32,
    /// Range shown on startup
    pub default_from: i32,
    pub default_to: i32,
}

impl Default for YearsConfig {
    fn default() -> Self {
        Self {
            min_year: 1940,
            max_year: 2024,
            default_from: 1940,
            default_to: 2024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Explicit database file; defaults to the platform data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the database file path.
    ///
    /// Returns `None` when no explicit path is set and the platform has no
    /// data directory, meaning persistent storage is unavailable.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(|| {
            dirs::data_dir().map(|d| d.join(APP_DIR_NAME).join("weather_history.db"))
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);

        Self {
            config_dir,
            archive: ArchiveConfig::default(),
            geocode: GeocodeConfig::default(),
            location: LocationConfig::default(),
            years: YearsConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, writing defaults if missing.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.archive.base_url, "archive.base_url", &mut result);
        self.validate_url(&self.geocode.base_url, "geocode.base_url", &mut result);

        if self.geocode.api_key().is_err() {
            result.add_warning(
                "geocode.api_key",
                "Geocoding API key not set - titles will show coordinates",
            );
        }

        if self.geocode.timeout_secs == 0 {
            result.add_error("geocode.timeout_secs", "Timeout must be greater than 0");
        }

        let years = &self.years;
        if years.min_year > years.max_year {
            result.add_error("years.min_year", "min_year must not exceed max_year");
        }
        if years.default_from > years.default_to {
            result.add_error(
                "years.default_from",
                "default_from must not exceed default_to",
            );
        }
        if years.default_from < years.min_year || years.default_to > years.max_year {
            result.add_warning(
                "years.default_from",
                format!(
                    "Default range {}-{} lies outside {}-{}",
                    years.default_from, years.default_to, years.min_year, years.max_year
                ),
            );
        }

        let loc = &self.location;
        match (loc.latitude, loc.longitude) {
            (Some(lat), Some(lon)) => {
                Self::validate_coordinates(lat, lon, "location", &mut result);
            }
            (None, None) => {}
            _ => result.add_error(
                "location",
                "latitude and longitude must be set together",
            ),
        }
        Self::validate_coordinates(
            loc.fallback_latitude,
            loc.fallback_longitude,
            "location.fallback",
            &mut result,
        );

        if self.store.resolved_database_path().is_none() {
            result.add_warning(
                "store.database_path",
                "No data directory available - local cache is disabled",
            );
        }

        result
    }

    fn validate_coordinates(lat: f64, lon: f64, field: &str, result: &mut ValidationResult) {
        if !(-90.0..=90.0).contains(&lat) {
            result.add_error(field, format!("Latitude out of range: {}", lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            result.add_error(field, format!("Longitude out of range: {}", lon));
        }
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Path of the client-side key-value state file.
    pub fn client_state_path(&self) -> PathBuf {
        self.config_dir.join("client_state.json")
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR_NAME);

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.archive.base_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "archive.base_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.geocode.base_url = "ftp://geocode.maps.co".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_reversed_year_range_is_error() {
        let mut config = Config::default();
        config.years.default_from = 2024;
        config.years.default_to = 2020;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "years.default_from"));
    }

    #[test]
    fn test_half_configured_location_is_error() {
        let mut config = Config::default();
        config.location.latitude = Some(10.0);
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "location"));
    }

    #[test]
    fn test_out_of_range_fallback() {
        let mut config = Config::default();
        config.location.fallback_latitude = 123.0;
        let result = config.validate();
        assert!(result
            .errors
            .iter()
            .any(|e| e.field == "location.fallback" && e.message.contains("Latitude")));
    }

    #[test]
    fn test_configured_api_key_wins() {
        let geocode = GeocodeConfig {
            api_key: Some("abc".to_string()),
            ..GeocodeConfig::default()
        };
        assert_eq!(geocode.api_key().unwrap(), "abc");
    }

    #[test]
    fn test_explicit_database_path() {
        let store = StoreConfig {
            database_path: Some(PathBuf::from("/tmp/wh.db")),
        };
        assert_eq!(
            store.resolved_database_path(),
            Some(PathBuf::from("/tmp/wh.db"))
        );
    }

    #[test]
    fn test_load_from_creates_default_then_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.archive.base_url, created.archive.base_url);
        assert_eq!(loaded.years.min_year, 1940);
    }

    #[test]
    fn test_default_range_spans_all_years() {
        let years = YearsConfig::default();
        assert_eq!(years.default_from, years.min_year);
        assert_eq!(years.default_to, years.max_year);
        assert_eq!((years.default_from, years.default_to), (1940, 2024));
    }

    #[test]
    fn test_load_from_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "config_dir = \"/tmp/wh\"\n[years]\nmin_year = 1950\nmax_year = 2000\ndefault_from = 1990\ndefault_to = 1995\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.years.min_year, 1950);
        assert_eq!(config.location.fallback_latitude, 59.57);
        assert_eq!(config.client_state_path(), PathBuf::from("/tmp/wh/client_state.json"));
    }

    #[test]
    fn test_load_from_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
