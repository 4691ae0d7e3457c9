//! API error types.

use almanac_acquire::AcquireError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error("storage error: {0}")]
    Storage(#[from] almanac_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] almanac_metadata::MetadataError),

    #[error("{0}")]
    Core(#[from] almanac_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Acquire(e) => e.code(),
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "invalid_date",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Acquire(e) => match e {
                AcquireError::NotResolved { .. } => StatusCode::NOT_FOUND,
                AcquireError::Upstream(_) => StatusCode::BAD_GATEWAY,
                AcquireError::PendingTimeout { .. } | AcquireError::DeadlineExceeded { .. } => {
                    StatusCode::GATEWAY_TIMEOUT
                }
                AcquireError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(_) | Self::Metadata(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        crate::metrics::record_api_error(self.code());
        if status.is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
