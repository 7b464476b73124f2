use serde::{Deserialize, Serialize};
use weatherhist_core::NetworkError;

use crate::series::year_of;

/// Measured quantity; each kind is cached in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measurement {
    Temperature,
    Precipitation,
}

impl Measurement {
    pub const ALL: [Measurement; 2] = [Measurement::Temperature, Measurement::Precipitation];

    /// Storage table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Precipitation => "precipitation",
        }
    }

    /// Daily variable requested from the archive.
    pub fn archive_variable(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature_2m_max",
            Self::Precipitation => "precipitation_sum",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Temperature => "°C",
            Self::Precipitation => "mm",
        }
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// One daily observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// ISO calendar date (`YYYY-MM-DD`)
    pub date: String,
    pub value: f64,
    /// Calendar year of `date`; derived when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl DataPoint {
    /// A point without an explicit year.
    pub fn new(date: impl Into<String>, value: f64) -> Self {
        Self {
            date: date.into(),
            value,
            year: None,
        }
    }

    /// The explicit year, or the one parsed from `date`.
    pub fn resolved_year(&self) -> Option<i32> {
        self.year.or_else(|| year_of(&self.date))
    }
}

/// Geographic location, compared by exact equality of both coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Coordinates rounded to two decimals, used when no place name is known.
    pub fn coordinates_label(&self) -> String {
        format!("{:.2}, {:.2}", self.latitude, self.longitude)
    }
}

/// Both daily series returned by one archive request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveSeries {
    pub temperature: Vec<DataPoint>,
    pub precipitation: Vec<DataPoint>,
}

impl ArchiveSeries {
    /// Take the series for one measurement.
    pub fn into_series(self, measurement: Measurement) -> Vec<DataPoint> {
        match measurement {
            Measurement::Temperature => self.temperature,
            Measurement::Precipitation => self.precipitation,
        }
    }
}

/// Location service errors
#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Location service unavailable")]
    ServiceUnavailable,
    #[error("Location state error: {0}")]
    Storage(String),
    #[error("Failed to invalidate cached data: {0}")]
    Invalidation(String),
}

/// Archive client errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    /// Superseded by a newer request; not a failure from the caller's view.
    #[error("Request superseded by a newer one")]
    Cancelled,
}

impl FetchError {
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchError::Network(e) => e.user_message(),
            FetchError::Cancelled => "Request replaced by a newer one.",
        }
    }
}
