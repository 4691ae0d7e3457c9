//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;

/// Longest object name accepted by any backend.
pub const MAX_OBJECT_NAME_LEN: usize = 255;

/// Bucketed blob store that hands back a public locator for every write.
///
/// Locators are opaque to callers: they are stored verbatim and never parsed.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Make sure `bucket` exists and is publicly readable.
    ///
    /// Idempotent; safe to call from several processes at once.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Store `data` as `bucket/name` and return its public locator.
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String>;

    /// Read a stored object back.
    async fn get(&self, bucket: &str, name: &str) -> StorageResult<Bytes>;

    /// Remove an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, name: &str) -> StorageResult<()>;

    /// Static identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup to ensure the storage is available before
    /// accepting requests. The default implementation returns Ok(()).
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Check a bucket name before handing it to a backend.
pub fn validate_bucket(bucket: &str) -> StorageResult<()> {
    almanac_core::config::validate_bucket_name(bucket)
        .map_err(|e| StorageError::InvalidBucket(e.to_string()))
}

/// Check an object name: a single path segment of `[A-Za-z0-9._-]` that does
/// not start with a dot.
pub fn validate_object_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
        return Err(StorageError::InvalidKey(format!(
            "object name must be 1-{MAX_OBJECT_NAME_LEN} bytes: {name:?}"
        )));
    }
    if name.starts_with('.') {
        return Err(StorageError::InvalidKey(format!(
            "object name must not start with '.': {name:?}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(StorageError::InvalidKey(format!(
            "object name contains unsupported characters: {name:?}"
        )));
    }
    Ok(())
}

/// Join a public base URL with a bucket and object key.
pub fn public_locator(base_url: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), bucket, key)
}
