//! Error types for artifact sources.

use almanac_core::ImageDate;
use thiserror::Error;

/// Source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid upstream response: {0}")]
    Decode(String),

    #[error("entry for {date} is {media_type:?}, not an image")]
    UnsupportedMedia { date: ImageDate, media_type: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
