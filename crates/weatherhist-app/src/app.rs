use anyhow::{Context, Result};
use std::sync::Arc;

use weatherhist_core::{AppError, Config};
use weatherhist_store::{CacheCoordinator, StoreHandle, StoreLocation};
use weatherhist_weather::{
    location_title, value_range, year_options, ArchiveClient, ConfiguredPosition, DataPoint,
    Geocoder, Location, LocationTracker, Measurement,
};

/// Application state: configuration plus the wired-up cache components.
pub struct App {
    config: Arc<Config>,
    store: StoreHandle,
    coordinator: CacheCoordinator,
    tracker: LocationTracker,
    position: ConfiguredPosition,
    geocoder: Option<Geocoder>,
}

impl App {
    /// Load configuration and build the store, archive client and tracker.
    pub fn new() -> Result<Self> {
        let (config, _) = Config::load_validated()?;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let store = StoreHandle::new(StoreLocation::from_config(&config.store));
        let archive = ArchiveClient::from_config(&config.archive)
            .context("Failed to create archive client")?;
        let coordinator = CacheCoordinator::new(store.clone(), Arc::new(archive));

        Ok(Self {
            tracker: LocationTracker::from_config(&config),
            position: ConfiguredPosition::from_config(&config.location),
            geocoder: Geocoder::from_config(&config.geocode),
            config: Arc::new(config),
            store,
            coordinator,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve the session location, clearing the cache if it moved.
    pub async fn resolve_location(&self) -> Result<Location> {
        self.tracker
            .resolve(&self.position, &self.store)
            .await
            .map_err(|e| AppError::Location(e.to_string()).into())
    }

    /// Print a summary of each measurement for the configured default years.
    pub async fn run(&self) -> Result<()> {
        let location = self.resolve_location().await?;
        let title = location_title(self.geocoder.as_ref(), &location).await;

        let years = &self.config.years;
        let options = year_options(years.min_year, years.max_year);
        println!("Weather history for {}", title);
        println!(
            "Years {}-{} ({} selectable)",
            years.default_from,
            years.default_to,
            options.len()
        );

        for measurement in Measurement::ALL {
            match self
                .coordinator
                .get_data(measurement, years.default_from, years.default_to, location)
                .await
            {
                Ok(points) => println!("  {}", summary_line(measurement, &points)),
                Err(e) if e.is_superseded() => {
                    tracing::debug!("Request for {} superseded", measurement);
                }
                Err(e) => {
                    let err = AppError::from(e);
                    tracing::error!("Failed to load {}: {}", measurement, err);
                    println!("  {}: {}", measurement, err.user_message());
                }
            }
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        tracing::info!("Shutting down application");
    }
}

/// One line describing a loaded series.
fn summary_line(measurement: Measurement, points: &[DataPoint]) -> String {
    match value_range(points) {
        Some((min, max)) => format!(
            "{}: {} days, {:.1} to {:.1} {}",
            measurement,
            points.len(),
            min,
            max,
            measurement.unit()
        ),
        None => format!("{}: no data", measurement),
    }
}
