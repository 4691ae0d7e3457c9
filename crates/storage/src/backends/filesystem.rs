//! Local filesystem storage backend.
//!
//! Buckets are subdirectories of the storage root. If the root is served by a
//! web server, set `public_base_url` so locators are URLs; otherwise locators
//! are absolute file paths.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BlobStore, public_locator, validate_bucket, validate_object_name};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Local filesystem blob store.
pub struct FilesystemBackend {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root if needed.
    pub async fn new(
        root: impl AsRef<Path>,
        public_base_url: Option<String>,
    ) -> StorageResult<Self> {
        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        Ok(Self {
            root,
            public_base_url,
        })
    }

    /// Storage root (canonical).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `bucket/name` to a path, with path traversal protection.
    ///
    /// Runs on the blocking pool because `canonicalize` and
    /// `symlink_metadata` hit the filesystem.
    async fn object_path(&self, bucket: &str, name: &str) -> StorageResult<PathBuf> {
        validate_bucket(bucket)?;
        validate_object_name(name)?;

        let root = self.root.clone();
        let relative = Path::new(bucket).join(name);
        tokio::task::spawn_blocking(move || Self::contained_path(&root, &relative))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Join `relative` onto `root`, refusing results that escape the root
    /// through symlinks (on the path itself or on its nearest existing ancestor).
    fn contained_path(root: &Path, relative: &Path) -> StorageResult<PathBuf> {
        let path = root.join(relative);
        let shown = relative.display();

        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!("symlink target missing or invalid: {shown}"))
                    } else {
                        StorageError::Io(e)
                    }
                })?;
                if !canonical.starts_with(root) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {shown}"
                    )));
                }
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {shown}"
                            ))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(root) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {shown}"
                        )));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
            ancestor = parent;
        }

        Ok(path)
    }

    fn locator(&self, bucket: &str, name: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => public_locator(base, bucket, name),
            None => path.display().to_string(),
        }
    }
}

fn not_found_or_io(e: std::io::Error, what: String) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(what)
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        validate_bucket(bucket)?;
        let root = self.root.clone();
        let dir = tokio::task::spawn_blocking({
            let bucket = bucket.to_string();
            move || Self::contained_path(&root, Path::new(&bucket))
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}"))))??;
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    /// The content type is not persisted; whatever serves the root derives it
    /// from the object name's extension.
    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        _content_type: Option<&str>,
    ) -> StorageResult<String> {
        let path = self.object_path(bucket, name).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to temp file with unique name, fsync, then rename for atomicity and durability
        let temp_path = path.with_file_name(format!(".{name}.tmp.{}", Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, &path).await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(self.locator(bucket, name, &path))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, bucket: &str, name: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, name).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, format!("{bucket}/{name}")))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, bucket: &str, name: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, name).await?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}
