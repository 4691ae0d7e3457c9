//! Server test utilities.

use super::source::{StubBehavior, StubSource};
use almanac_core::config::{AppConfig, MetadataConfig, StorageConfig};
use almanac_metadata::{MetadataStore, SqliteStore};
use almanac_server::{AppState, create_router};
use almanac_storage::{BlobStore, FilesystemBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// Base URL the filesystem blob store builds locators from.
#[allow(dead_code)]
pub const STORE_URL: &str = "http://store";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub source: Arc<StubSource>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server whose upstream always returns an image.
    pub async fn new() -> Self {
        Self::with_source(StubBehavior::Image, |_| {}).await
    }

    /// Create a test server with a scripted upstream and config modifications.
    pub async fn with_source<F>(behavior: StubBehavior, modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let blobs: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(&storage_path, Some(STORE_URL.to_string()))
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("records.db");
        let records: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create record store"),
        );

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem {
                path: storage_path,
                public_base_url: Some(STORE_URL.to_string()),
            },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                busy_timeout_secs: None,
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let source = StubSource::new(behavior);
        let state = AppState::new(config, records, blobs, source.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            source,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying record store.
    pub fn records(&self) -> Arc<dyn MetadataStore> {
        self.state.records.clone()
    }
}
