//! Cache-first data access: serve cached years, backfill the rest from the
//! archive.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::instrument;
use weatherhist_weather::{ArchiveClient, DataPoint, Location, Measurement};

use crate::error::CacheError;
use crate::store::StoreHandle;

/// Years in `[from_year, to_year]` with no point in `cached`.
///
/// A single point of a year marks the whole year as present.
pub fn gap_years(cached: &[DataPoint], from_year: i32, to_year: i32) -> BTreeSet<i32> {
    let present: BTreeSet<i32> = cached.iter().filter_map(DataPoint::resolved_year).collect();
    (from_year..=to_year)
        .filter(|year| !present.contains(year))
        .collect()
}

/// Combines the local store and the archive client.
#[derive(Debug, Clone)]
pub struct CacheCoordinator {
    store: StoreHandle,
    archive: Arc<ArchiveClient>,
}

impl CacheCoordinator {
    pub fn new(store: StoreHandle, archive: Arc<ArchiveClient>) -> Self {
        Self { store, archive }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Daily series of `measurement` for `[from_year, to_year]`, sorted by date.
    ///
    /// Years already cached are read from the store. If any year is missing
    /// the whole span is fetched, and only points for missing years are
    /// persisted and returned alongside the cached ones.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidRange`] if `from_year > to_year`
    /// - [`CacheError::StoreUnavailable`] if the store cannot be opened or read
    /// - [`CacheError::FetchFailed`] on archive failure or when a newer fetch
    ///   superseded this one
    /// - [`CacheError::PersistFailed`] if fetched points cannot be written
    #[instrument(skip(self), level = "info")]
    pub async fn get_data(
        &self,
        measurement: Measurement,
        from_year: i32,
        to_year: i32,
        location: Location,
    ) -> Result<Vec<DataPoint>, CacheError> {
        if from_year > to_year {
            return Err(CacheError::InvalidRange {
                from: from_year,
                to: to_year,
            });
        }

        self.store
            .open()
            .await
            .map_err(CacheError::StoreUnavailable)?;
        let mut points = self
            .store
            .query_range(measurement, from_year, to_year)
            .await
            .map_err(CacheError::StoreUnavailable)?;

        let gaps = gap_years(&points, from_year, to_year);
        if gaps.is_empty() {
            tracing::debug!(cached = points.len(), "Serving range from cache");
            sort_by_date(&mut points);
            return Ok(points);
        }
        tracing::debug!(?gaps, cached = points.len(), "Missing years, fetching archive");

        let fetched = self
            .archive
            .fetch(from_year, to_year, location)
            .await
            .map_err(CacheError::FetchFailed)?
            .into_series(measurement);

        // First occurrence of a date wins, as in the store.
        let mut seen = HashSet::new();
        let missing: Vec<DataPoint> = fetched
            .into_iter()
            .filter_map(|mut point| {
                let year = point.resolved_year()?;
                if (from_year..=to_year).contains(&year) && gaps.contains(&year) {
                    point.year = Some(year);
                    Some(point)
                } else {
                    None
                }
            })
            .filter(|point| seen.insert(point.date.clone()))
            .collect();

        self.store
            .insert(measurement, missing.clone())
            .await
            .map_err(CacheError::PersistFailed)?;

        points.extend(missing);
        sort_by_date(&mut points);
        Ok(points)
    }
}

fn sort_by_date(points: &mut [DataPoint]) {
    points.sort_by(|a, b| a.date.cmp(&b.date));
}
