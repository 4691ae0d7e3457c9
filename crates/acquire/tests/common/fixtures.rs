use super::mocks::{InstrumentedBlobStore, MockSource};
use almanac_acquire::AcquisitionCache;
use almanac_core::ImageDate;
use almanac_core::config::AcquireConfig;
use almanac_metadata::{MetadataStore, SqliteStore};
use almanac_storage::FilesystemBackend;
use std::sync::Arc;
use tempfile::TempDir;

/// Base URL the filesystem blob store builds locators from.
#[allow(dead_code)]
pub const STORE_URL: &str = "http://store";

#[allow(dead_code)]
pub fn day(year: i32, month: u8, d: u8) -> ImageDate {
    ImageDate::from_ymd(year, month, d).expect("valid test date")
}

/// Short polling so stuck-claim tests finish quickly.
#[allow(dead_code)]
pub fn test_settings() -> AcquireConfig {
    AcquireConfig {
        poll_attempts: 5,
        poll_interval_ms: 20,
        ..AcquireConfig::default()
    }
}

/// SQLite record store plus filesystem blob store in one temp directory.
#[allow(dead_code)]
pub struct TestEnv {
    pub records: Arc<dyn MetadataStore>,
    pub blobs: Arc<InstrumentedBlobStore>,
    pub source: Arc<MockSource>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        Self::with_source(MockSource::new()).await
    }

    pub async fn with_source(source: Arc<MockSource>) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let records = SqliteStore::new(temp_dir.path().join("records.db"), None)
            .await
            .expect("Failed to open record store");
        let blobs = FilesystemBackend::new(
            temp_dir.path().join("blobs"),
            Some(STORE_URL.to_string()),
        )
        .await
        .expect("Failed to create blob store");

        Self {
            records: Arc::new(records),
            blobs: InstrumentedBlobStore::new(Arc::new(blobs)),
            source,
            _temp_dir: temp_dir,
        }
    }

    pub fn cache(&self) -> AcquisitionCache {
        self.cache_with(test_settings())
    }

    pub fn cache_with(&self, settings: AcquireConfig) -> AcquisitionCache {
        AcquisitionCache::new(
            self.records.clone(),
            self.blobs.clone(),
            self.source.clone(),
            settings,
        )
    }

    /// Cache over a different record store sharing this env's blobs and source.
    pub fn cache_over(&self, records: Arc<dyn MetadataStore>) -> AcquisitionCache {
        AcquisitionCache::new(
            records,
            self.blobs.clone(),
            self.source.clone(),
            test_settings(),
        )
    }
}
