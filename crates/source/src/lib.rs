//! Upstream artifact sources for Almanac.
//!
//! The acquisition cache only sees [`ArtifactSource`]; [`ApodClient`] is the
//! production implementation.

pub mod apod;
pub mod error;
pub mod traits;

pub use apod::ApodClient;
pub use error::{SourceError, SourceResult};
pub use traits::ArtifactSource;

use almanac_core::config::SourceConfig;
use std::sync::Arc;

/// Create an artifact source from configuration.
pub fn from_config(config: &SourceConfig) -> SourceResult<Arc<dyn ArtifactSource>> {
    config.validate().map_err(SourceError::Config)?;
    Ok(Arc::new(ApodClient::new(config)?))
}
