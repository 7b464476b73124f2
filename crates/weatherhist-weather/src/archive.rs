//! Open-Meteo archive client for daily temperature and precipitation.
//!
//! Only one request is in flight per client: starting a new fetch cancels the
//! previous one, which then resolves with [`FetchError::Cancelled`] and never
//! yields data.

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use weatherhist_core::{ArchiveConfig, NetworkError, ReqwestErrorExt};

use crate::types::{ArchiveSeries, DataPoint, FetchError, Location, Measurement};

const USER_AGENT: &str = concat!("weatherhist/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: Option<ArchiveDaily>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDaily {
    #[serde(default)]
    time: Vec<Option<String>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

impl ArchiveDaily {
    /// Zip the parallel arrays, dropping positions with no date or no value.
    fn into_series(self) -> ArchiveSeries {
        let mut series = ArchiveSeries::default();

        for (ix, date) in self.time.into_iter().enumerate() {
            let Some(date) = date else { continue };

            if let Some(v) = self.temperature_2m_max.get(ix).copied().flatten() {
                series.temperature.push(DataPoint::new(date.clone(), v));
            }
            if let Some(v) = self.precipitation_sum.get(ix).copied().flatten() {
                series.precipitation.push(DataPoint::new(date, v));
            }
        }

        series
    }
}

#[derive(Debug, Default)]
struct InFlight {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Client for the historical weather archive.
#[derive(Debug)]
pub struct ArchiveClient {
    client: Client,
    base_url: String,
    in_flight: Mutex<InFlight>,
}

impl ArchiveClient {
    /// Create a client for the given service base URL.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            in_flight: Mutex::new(InFlight::default()),
        })
    }

    pub fn from_config(config: &ArchiveConfig) -> Result<Self, FetchError> {
        Self::new(&config.base_url)
    }

    /// Fetch both daily series for `[from_year-01-01, to_year-12-31]`.
    ///
    /// Any fetch still running on this client is cancelled first.
    ///
    /// # Errors
    ///
    /// [`FetchError::Cancelled`] if a newer fetch superseded this one,
    /// [`FetchError::Network`] on transport, status or decoding failures.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch(
        &self,
        from_year: i32,
        to_year: i32,
        location: Location,
    ) -> Result<ArchiveSeries, FetchError> {
        let (generation, token) = self.begin();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Cancelled),
            res = self.request(from_year, to_year, location) => res,
        };

        self.finish(generation);

        if token.is_cancelled() {
            tracing::debug!(generation, "Archive fetch superseded, discarding result");
            return Err(FetchError::Cancelled);
        }

        if let Ok(series) = &result {
            tracing::info!(
                temperature = series.temperature.len(),
                precipitation = series.precipitation.len(),
                "Archive fetch complete"
            );
        }
        result
    }

    /// Register a new in-flight request, cancelling the previous one.
    fn begin(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let mut state = self.in_flight.lock();
        state.generation += 1;
        if let Some(previous) = state.token.replace(token.clone()) {
            tracing::debug!(generation = state.generation - 1, "Cancelling superseded fetch");
            previous.cancel();
        }
        (state.generation, token)
    }

    fn finish(&self, generation: u64) {
        let mut state = self.in_flight.lock();
        if state.generation == generation {
            state.token = None;
        }
    }

    async fn request(
        &self,
        from_year: i32,
        to_year: i32,
        location: Location,
    ) -> Result<ArchiveSeries, FetchError> {
        let url = format!("{}/v1/archive", self.base_url);
        let daily = format!(
            "{},{}",
            Measurement::Temperature.archive_variable(),
            Measurement::Precipitation.archive_variable()
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("start_date", format!("{}-01-01", from_year)),
                ("end_date", format!("{}-12-31", to_year)),
                ("daily", daily),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FetchError::Network(NetworkError::ServerError {
                status: status.as_u16(),
                message: text,
            }));
        }

        let body: ArchiveResponse = response
            .json()
            .await
            .map_err(|e| FetchError::Network(NetworkError::InvalidResponse(e.to_string())))?;

        Ok(body.daily.map(ArchiveDaily::into_series).unwrap_or_default())
    }
}
