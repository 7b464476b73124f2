//! SQLite-backed local store for daily measurements.
//!
//! One table per [`Measurement`], keyed by date with an index on year. The
//! connection is opened lazily and shared by every clone of the handle; all
//! access goes through one mutex, so calls never interleave.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use weatherhist_core::{RusqliteErrorExt, StoreConfig};
use weatherhist_weather::{year_of, CacheInvalidator, DataPoint, Measurement};

use crate::error::StoreError;

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
    /// No persistent storage on this system.
    Unavailable,
}

impl StoreLocation {
    pub fn from_config(config: &StoreConfig) -> Self {
        match config.resolved_database_path() {
            Some(path) => Self::File(path),
            None => Self::Unavailable,
        }
    }
}

/// Shared handle to the local store.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    location: Arc<StoreLocation>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl StoreHandle {
    /// Create a handle; nothing is opened until [`StoreHandle::open`].
    pub fn new(location: StoreLocation) -> Self {
        Self {
            location: Arc::new(location),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    /// Handle to a fresh in-memory database.
    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run blocking SQLite work off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Option<Connection>) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&mut *conn.lock()))
            .await
            .map_err(|e| StoreError::Background(e.to_string()))?
    }

    /// Open the database, creating both tables if needed. Idempotent.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unsupported`] without a storage location,
    /// [`StoreError::OpenFailed`] if SQLite cannot open or initialise it.
    pub async fn open(&self) -> Result<(), StoreError> {
        let location = self.location.clone();
        self.with_conn(move |slot| {
            if slot.is_some() {
                tracing::debug!("Store already open");
                return Ok(());
            }

            let conn = connect(&location)?;
            init_schema(&conn)?;
            *slot = Some(conn);
            tracing::info!(location = ?location, "Store opened");
            Ok(())
        })
        .await
    }

    /// Insert points in one transaction.
    ///
    /// The stored year always comes from the date. Dates already stored are
    /// skipped; the first value written for a date is kept.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotOpen`] before [`StoreHandle::open`],
    /// [`StoreError::InvalidDate`] if a date does not parse or disagrees with
    /// an explicit year (nothing is written), [`StoreError::WriteFailed`] if
    /// the transaction fails.
    pub async fn insert(
        &self,
        measurement: Measurement,
        points: Vec<DataPoint>,
    ) -> Result<(), StoreError> {
        self.with_conn(move |slot| {
            let conn = slot.as_mut().ok_or(StoreError::NotOpen)?;

            let rows = points
                .into_iter()
                .map(|p| match (year_of(&p.date), p.year) {
                    (Some(year), None) => Ok((p.date, year, p.value)),
                    (Some(year), Some(explicit)) if year == explicit => {
                        Ok((p.date, year, p.value))
                    }
                    _ => Err(StoreError::InvalidDate(p.date)),
                })
                .collect::<Result<Vec<_>, _>>()?;

            let write_err = |e: rusqlite::Error| StoreError::WriteFailed(e.into_database_error());
            let tx = conn.transaction().map_err(write_err)?;
            let mut inserted = 0;
            {
                let mut stmt = tx
                    .prepare(&format!(
                        "INSERT OR IGNORE INTO {} (date, year, value) VALUES (?1, ?2, ?3)",
                        measurement.table_name()
                    ))
                    .map_err(write_err)?;
                for (date, year, value) in &rows {
                    inserted += stmt.execute(params![date, year, value]).map_err(write_err)?;
                }
            }
            tx.commit().map_err(write_err)?;

            tracing::info!(
                table = measurement.table_name(),
                inserted,
                skipped = rows.len() - inserted,
                "Stored data points"
            );
            Ok(())
        })
        .await
    }

    /// All points whose year lies in `[from_year, to_year]`, in no particular order.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotOpen`] before [`StoreHandle::open`],
    /// [`StoreError::ReadFailed`] on query failure.
    pub async fn query_range(
        &self,
        measurement: Measurement,
        from_year: i32,
        to_year: i32,
    ) -> Result<Vec<DataPoint>, StoreError> {
        self.with_conn(move |slot| {
            let conn = slot.as_ref().ok_or(StoreError::NotOpen)?;
            let read_err = |e: rusqlite::Error| StoreError::ReadFailed(e.into_database_error());

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT date, year, value FROM {} WHERE year BETWEEN ?1 AND ?2",
                    measurement.table_name()
                ))
                .map_err(read_err)?;

            let rows = stmt
                .query_map(params![from_year, to_year], |row| {
                    Ok(DataPoint {
                        date: row.get(0)?,
                        year: Some(row.get(1)?),
                        value: row.get(2)?,
                    })
                })
                .map_err(read_err)?;

            let points = rows.collect::<Result<Vec<_>, _>>().map_err(read_err)?;
            tracing::debug!(
                table = measurement.table_name(),
                from_year,
                to_year,
                count = points.len(),
                "Read cached data points"
            );
            Ok(points)
        })
        .await
    }

    /// Number of stored points for a measurement.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotOpen`] before [`StoreHandle::open`],
    /// [`StoreError::ReadFailed`] on query failure.
    pub async fn count(&self, measurement: Measurement) -> Result<usize, StoreError> {
        self.with_conn(move |slot| {
            let conn = slot.as_ref().ok_or(StoreError::NotOpen)?;
            let count: i64 = conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {}", measurement.table_name()),
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| StoreError::ReadFailed(e.into_database_error()))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    /// Remove every point from both tables, opening the store first if needed.
    ///
    /// # Errors
    ///
    /// Any [`StoreHandle::open`] error, or [`StoreError::ClearFailed`].
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.open().await?;

        self.with_conn(|slot| {
            let conn = slot.as_mut().ok_or(StoreError::NotOpen)?;
            let clear_err = |e: rusqlite::Error| StoreError::ClearFailed(e.into_database_error());

            let tx = conn.transaction().map_err(clear_err)?;
            for measurement in Measurement::ALL {
                tx.execute(&format!("DELETE FROM {}", measurement.table_name()), [])
                    .map_err(clear_err)?;
            }
            tx.commit().map_err(clear_err)?;

            tracing::info!("Store cleared");
            Ok(())
        })
        .await
    }
}

impl CacheInvalidator for StoreHandle {
    type Error = StoreError;

    async fn invalidate(&self) -> Result<(), StoreError> {
        self.clear().await
    }
}

fn connect(location: &StoreLocation) -> Result<Connection, StoreError> {
    let open_err = |e: rusqlite::Error| StoreError::OpenFailed(e.into_database_error());

    match location {
        StoreLocation::Unavailable => Err(StoreError::Unsupported),
        StoreLocation::Memory => Connection::open_in_memory().map_err(open_err),
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::OpenFailed(weatherhist_core::DatabaseError::ConnectionFailed(
                        format!("{}: {}", parent.display(), e),
                    ))
                })?;
            }
            Connection::open(path).map_err(open_err)
        }
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let schema = Measurement::ALL
        .iter()
        .map(|m| {
            let table = m.table_name();
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    date TEXT PRIMARY KEY,
                    year INTEGER NOT NULL,
                    value REAL NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_year ON {table}(year);
                "#
            )
        })
        .collect::<String>();

    conn.execute_batch(&schema)
        .map_err(|e| StoreError::OpenFailed(e.into_database_error()))
}
