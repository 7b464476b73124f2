//! Local weather history cache.
//!
//! [`StoreHandle`] persists daily measurements in SQLite and
//! [`CacheCoordinator`] serves year ranges from it, backfilling missing years
//! from the archive.

pub mod coordinator;
pub mod error;
pub mod store;

pub use coordinator::{gap_years, CacheCoordinator};
pub use error::{CacheError, StoreError};
pub use store::{StoreHandle, StoreLocation};
