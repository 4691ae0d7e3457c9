//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid image date: {0}")]
    InvalidDate(String),

    #[error("image date {date} is out of range ({reason})")]
    DateOutOfRange { date: String, reason: &'static str },

    #[error("invalid bucket name: {0}")]
    InvalidBucket(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
