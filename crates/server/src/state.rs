//! Application state shared across handlers.

use almanac_acquire::AcquisitionCache;
use almanac_core::config::AppConfig;
use almanac_metadata::MetadataStore;
use almanac_source::ArtifactSource;
use almanac_storage::BlobStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Record store.
    pub records: Arc<dyn MetadataStore>,
    /// Blob store.
    pub blobs: Arc<dyn BlobStore>,
    /// Acquisition cache over the two stores.
    pub cache: AcquisitionCache,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        config: AppConfig,
        records: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        source: Arc<dyn ArtifactSource>,
    ) -> Self {
        let cache = AcquisitionCache::new(
            records.clone(),
            blobs.clone(),
            source,
            config.acquire.clone(),
        );
        Self {
            config: Arc::new(config),
            records,
            blobs,
            cache,
        }
    }
}
