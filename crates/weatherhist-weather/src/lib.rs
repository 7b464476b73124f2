//! Weather data sources for the weather history application.
//!
//! Provides the Open-Meteo archive client, reverse geocoding for the display
//! title and session location tracking.

pub mod archive;
pub mod geocode;
pub mod location;
pub mod series;
pub mod types;

pub use archive::ArchiveClient;
pub use geocode::{location_title, Geocoder};
pub use location::{
    CacheInvalidator, ClientState, ConfiguredPosition, GeolocationSource, LocationTracker,
};
pub use series::{value_range, year_of, year_options};
pub use types::*;
