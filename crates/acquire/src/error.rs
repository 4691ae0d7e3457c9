//! Error types for the acquisition cache.

use almanac_core::ImageDate;
use almanac_metadata::MetadataError;
use almanac_source::SourceError;
use almanac_storage::StorageError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Acquisition errors.
///
/// Cloneable so that every caller coalesced onto one flight receives the
/// same outcome; underlying errors are shared behind `Arc`.
#[derive(Debug, Clone, Error)]
pub enum AcquireError {
    #[error("no image resolved for {date}")]
    NotResolved { date: ImageDate },

    #[error("image for {date} still pending after {attempts} polls")]
    PendingTimeout { date: ImageDate, attempts: u32 },

    #[error("upstream fetch failed: {0}")]
    Upstream(#[source] Arc<SourceError>),

    #[error("record store error: {0}")]
    Metadata(#[source] Arc<MetadataError>),

    #[error("blob store error: {0}")]
    Storage(#[source] Arc<StorageError>),

    #[error("{original}; rolling back the claim also failed: {rollback}")]
    RollbackFailed {
        original: Box<AcquireError>,
        #[source]
        rollback: Arc<MetadataError>,
    },

    #[error("gave up waiting for {date} after {waited:?}")]
    DeadlineExceeded { date: ImageDate, waited: Duration },

    #[error("request for {date} was cancelled")]
    Cancelled { date: ImageDate },

    #[error("acquisition task for {date} ended without an outcome")]
    Abandoned { date: ImageDate },
}

impl AcquireError {
    /// Stable machine-readable code, used in API error bodies and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            AcquireError::NotResolved { .. } => "not_resolved",
            AcquireError::PendingTimeout { .. } => "pending_timeout",
            AcquireError::Upstream(_) => "upstream_error",
            AcquireError::Metadata(_) => "metadata_error",
            AcquireError::Storage(_) => "storage_error",
            AcquireError::RollbackFailed { .. } => "rollback_failed",
            AcquireError::DeadlineExceeded { .. } => "deadline_exceeded",
            AcquireError::Cancelled { .. } => "cancelled",
            AcquireError::Abandoned { .. } => "abandoned",
        }
    }
}

impl From<SourceError> for AcquireError {
    fn from(err: SourceError) -> Self {
        AcquireError::Upstream(Arc::new(err))
    }
}

impl From<MetadataError> for AcquireError {
    fn from(err: MetadataError) -> Self {
        AcquireError::Metadata(Arc::new(err))
    }
}

impl From<StorageError> for AcquireError {
    fn from(err: StorageError) -> Self {
        AcquireError::Storage(Arc::new(err))
    }
}

/// Result type for acquisition operations.
pub type AcquireResult<T> = Result<T, AcquireError>;
