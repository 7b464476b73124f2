//! Store and cache error types.

use thiserror::Error;
use weatherhist_core::{AppError, DatabaseError};
use weatherhist_weather::FetchError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Persistent storage is not available")]
    Unsupported,

    #[error("Failed to open store: {0}")]
    OpenFailed(#[source] DatabaseError),

    #[error("Store has not been opened")]
    NotOpen,

    #[error("Failed to clear store: {0}")]
    ClearFailed(#[source] DatabaseError),

    #[error("Failed to write to store: {0}")]
    WriteFailed(#[source] DatabaseError),

    #[error("Failed to read from store: {0}")]
    ReadFailed(#[source] DatabaseError),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Store task failed: {0}")]
    Background(String),
}

impl StoreError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unsupported => "Local cache is not supported on this system.",
            Self::OpenFailed(e)
            | Self::ClearFailed(e)
            | Self::WriteFailed(e)
            | Self::ReadFailed(e) => e.user_message(),
            Self::NotOpen => "Local cache is not ready yet.",
            Self::InvalidDate(_) => "Received data with an invalid date.",
            Self::Background(_) => "Local cache error. Please try again.",
        }
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid year range: {from}-{to}")]
    InvalidRange { from: i32, to: i32 },

    #[error("Local store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Fetching archive data failed: {0}")]
    FetchFailed(#[source] FetchError),

    #[error("Persisting fetched data failed: {0}")]
    PersistFailed(#[source] StoreError),
}

impl CacheError {
    /// A newer request replaced this one; callers should ignore it quietly.
    pub fn is_superseded(&self) -> bool {
        matches!(self, Self::FetchFailed(FetchError::Cancelled))
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "The start year must not be after the end year.",
            Self::StoreUnavailable(e) | Self::PersistFailed(e) => e.user_message(),
            Self::FetchFailed(e) => e.user_message(),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        let user_message = err.user_message();
        AppError::service(err, user_message)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let user_message = err.user_message();
        AppError::service(err, user_message)
    }
}
