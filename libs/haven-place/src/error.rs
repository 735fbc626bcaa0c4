//! Place Substrate Error Types

use thiserror::Error;

/// Result type for place substrate operations
pub type Result<T> = std::result::Result<T, PlaceError>;

/// Place substrate errors
#[derive(Debug, Error)]
pub enum PlaceError {
    /// Place id string could not be parsed
    #[error("Invalid place id: {0}")]
    InvalidPlaceId(String),
}
