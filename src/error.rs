//! Error types for appstats

use thiserror::Error;

/// Main error type for the appstats library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// IO error (database directory, log directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network or server error on a collector call
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed response from the collector
    #[error("decode error: {0}")]
    Decode(String),
}

/// Result type alias for appstats
pub type Result<T> = std::result::Result<T, Error>;
