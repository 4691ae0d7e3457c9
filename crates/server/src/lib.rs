//! HTTP API server for the Almanac image cache.
//!
//! This crate provides:
//! - Image lookup by date, fetching from upstream on a miss
//! - The album of every stored image
//! - Health and Prometheus endpoints

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
