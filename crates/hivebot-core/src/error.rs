//! Error types for the Hivebot core library.

use thiserror::Error;

/// Result type alias using the Hivebot core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for Hivebot operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Worker wire protocol parsing error
    #[error("Failed to parse worker event: {0}")]
    WireParse(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
