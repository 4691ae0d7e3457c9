use almanac_core::{Artifact, ImageDate};
use almanac_metadata::models::{ImageRow, ResolvedImageRow};
use almanac_metadata::{
    ClaimOutcome, ClaimToken, ImageRepo, MetadataError, MetadataResult, MetadataStore,
};
use almanac_source::{ArtifactSource, SourceError, SourceResult};
use almanac_storage::{BlobStore, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::time::Duration;

/// Artifact source that counts calls and can be told to fail or stall.
#[allow(dead_code)]
pub struct MockSource {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    panic_on_fetch: AtomicBool,
    delay: Duration,
    content_type: Option<String>,
}

#[allow(dead_code)]
impl MockSource {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            panic_on_fetch: AtomicBool::new(false),
            delay,
            content_type: Some("image/jpeg".to_string()),
        })
    }

    /// Make the next `n` fetches fail with an upstream 503.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make every fetch panic.
    pub fn panic_on_fetch(&self) {
        self.panic_on_fetch.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactSource for MockSource {
    async fn fetch(&self, date: ImageDate) -> SourceResult<Artifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_on_fetch.load(Ordering::SeqCst) {
            panic!("mock source told to panic for {date}");
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Status {
                status: 503,
                body: "upstream unavailable".to_string(),
            });
        }
        Ok(Artifact::new(
            Bytes::from(format!("image for {date}")),
            self.content_type.clone(),
        ))
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

/// Blob store wrapper that counts operations and can refuse writes.
#[allow(dead_code)]
pub struct InstrumentedBlobStore {
    inner: Arc<dyn BlobStore>,
    pub ensure_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    fail_puts: AtomicBool,
}

#[allow(dead_code)]
impl InstrumentedBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            ensure_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
        })
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub fn puts(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn ensures(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for InstrumentedBlobStore {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_bucket(bucket).await
    }

    async fn put(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(bucket, name, data, content_type).await
    }

    async fn get(&self, bucket: &str, name: &str) -> StorageResult<Bytes> {
        self.inner.get(bucket, name).await
    }

    async fn delete(&self, bucket: &str, name: &str) -> StorageResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(bucket, name).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}

/// Record store wrapper whose resolve and unclaim can be made to fail.
#[allow(dead_code)]
pub struct FlakyRecords {
    inner: Arc<dyn MetadataStore>,
    fail_resolve: AtomicBool,
    fail_unclaim: AtomicBool,
}

#[allow(dead_code)]
impl FlakyRecords {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_resolve: AtomicBool::new(false),
            fail_unclaim: AtomicBool::new(false),
        })
    }

    pub fn fail_resolve(&self) {
        self.fail_resolve.store(true, Ordering::SeqCst);
    }

    pub fn fail_unclaim(&self) {
        self.fail_unclaim.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageRepo for FlakyRecords {
    async fn claim_image(
        &self,
        date: ImageDate,
        claimed_at: OffsetDateTime,
    ) -> MetadataResult<ClaimOutcome> {
        self.inner.claim_image(date, claimed_at).await
    }

    async fn resolve_image(
        &self,
        date: ImageDate,
        token: ClaimToken,
        locator: &str,
        resolved_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        if self.fail_resolve.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal("injected resolve failure".to_string()));
        }
        self.inner.resolve_image(date, token, locator, resolved_at).await
    }

    async fn unclaim_image(&self, date: ImageDate, token: ClaimToken) -> MetadataResult<()> {
        if self.fail_unclaim.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal("injected unclaim failure".to_string()));
        }
        self.inner.unclaim_image(date, token).await
    }

    async fn get_image_row(&self, date: ImageDate) -> MetadataResult<Option<ImageRow>> {
        self.inner.get_image_row(date).await
    }

    async fn list_resolved_images(&self) -> MetadataResult<Vec<ResolvedImageRow>> {
        self.inner.list_resolved_images().await
    }

    async fn release_stale_claims(&self, older_than: OffsetDateTime) -> MetadataResult<u64> {
        self.inner.release_stale_claims(older_than).await
    }
}

#[async_trait]
impl MetadataStore for FlakyRecords {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}
