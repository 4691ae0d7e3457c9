//! Acquisition cache: resolve a date to a stored image locator.
//!
//! A miss is served by at most one fetch per pending episode. Inside a
//! process the [`WaiterRegistry`] coalesces callers onto one flight task;
//! across processes the durable claim in the record store decides who
//! fetches, and everyone else polls the record until it settles.

use crate::error::{AcquireError, AcquireResult};
use crate::metrics;
use crate::registry::{FlightGuard, Outcome, Registration, WaiterRegistry};
use almanac_core::ImageDate;
use almanac_core::config::AcquireConfig;
use almanac_metadata::{ClaimOutcome, ClaimToken, MetadataStore, RecordState};
use almanac_source::ArtifactSource;
use almanac_storage::BlobStore;
use std::ops::ControlFlow;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// What a flight found when it looked at the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// Already resolved.
    Hit(String),
    /// We inserted the pending row and own the fetch.
    ClaimWon(ClaimToken),
    /// The row appeared between our read and our claim.
    ClaimLost,
    /// Someone else's claim is pending.
    Pending,
}

/// A resolved album entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub date: ImageDate,
    pub locator: String,
}

/// Date-keyed acquisition cache.
///
/// Cheap to clone; clones share the waiter registry.
#[derive(Clone)]
pub struct AcquisitionCache {
    inner: Arc<Inner>,
}

struct Inner {
    records: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    source: Arc<dyn ArtifactSource>,
    settings: AcquireConfig,
    waiters: WaiterRegistry,
    bucket_ready: OnceCell<()>,
}

impl AcquisitionCache {
    pub fn new(
        records: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        source: Arc<dyn ArtifactSource>,
        settings: AcquireConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                records,
                blobs,
                source,
                settings,
                waiters: WaiterRegistry::default(),
                bucket_ready: OnceCell::new(),
            }),
        }
    }

    /// Resolve `date` to its locator, fetching and storing the image on a miss.
    ///
    /// Bounded by `acquire.wait_timeout_secs` when configured. Giving up only
    /// stops this caller from waiting; the flight keeps running.
    pub async fn resolve(&self, date: ImageDate) -> AcquireResult<String> {
        match self.inner.settings.wait_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.resolve_unbounded(date))
                .await
                .map_err(|_| AcquireError::DeadlineExceeded {
                    date,
                    waited: limit,
                })?,
            None => self.resolve_unbounded(date).await,
        }
    }

    /// Like [`Self::resolve`], but also stops waiting when `cancel` fires.
    pub async fn resolve_until(
        &self,
        date: ImageDate,
        cancel: &CancellationToken,
    ) -> AcquireResult<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled { date }),
            outcome = self.resolve(date) => outcome,
        }
    }

    /// Poll the record for `date` until it is resolved or rolled back.
    ///
    /// Never fetches. Returns [`AcquireError::NotResolved`] if the record
    /// disappears and [`AcquireError::PendingTimeout`] if it stays pending
    /// for the whole polling budget.
    pub async fn wait_for_resolution(&self, date: ImageDate) -> AcquireResult<String> {
        self.inner.wait_for_resolution(date).await
    }

    /// Every resolved image, oldest first. Pending records are not listed.
    pub async fn list_resolved(&self) -> AcquireResult<Vec<ResolvedImage>> {
        let rows = self.inner.records.list_resolved_images().await?;
        Ok(rows
            .into_iter()
            .map(|row| ResolvedImage {
                date: row.date(),
                locator: row.locator,
            })
            .collect())
    }

    /// Release pending records older than `acquire.stale_claim_secs`.
    ///
    /// Meant for startup, before any flight of this process exists.
    pub async fn release_stale_claims(&self) -> AcquireResult<u64> {
        let cutoff = OffsetDateTime::now_utc() - self.inner.settings.stale_claim_age();
        let released = self.inner.records.release_stale_claims(cutoff).await?;
        if released > 0 {
            tracing::warn!(released, %cutoff, "released stale pending claims");
        }
        Ok(released)
    }

    /// Number of dates with a flight currently running in this process.
    pub fn in_flight(&self) -> usize {
        self.inner.waiters.in_flight()
    }

    async fn resolve_unbounded(&self, date: ImageDate) -> AcquireResult<String> {
        if let RecordState::Resolved(locator) = self.inner.records.get_image(date).await? {
            metrics::CACHE_HITS.inc();
            return Ok(locator);
        }

        let rx = match self.inner.waiters.register(date) {
            Registration::Leader(rx) => {
                metrics::FLIGHTS_STARTED.inc();
                self.spawn_flight(date);
                rx
            }
            Registration::Follower(rx) => {
                metrics::COALESCED_WAITERS.inc();
                rx
            }
        };

        rx.await.unwrap_or(Err(AcquireError::Abandoned { date }))
    }

    fn spawn_flight(&self, date: ImageDate) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let guard = FlightGuard::new(&inner.waiters, date);
            let outcome = inner.fly(date).await;
            let delivered = guard.finish(&outcome);
            tracing::debug!(%date, delivered, ok = outcome.is_ok(), "acquisition flight finished");
        });
    }
}

impl Inner {
    async fn fly(&self, date: ImageDate) -> Outcome {
        match self.lookup(date).await? {
            Lookup::Hit(locator) => {
                metrics::CACHE_HITS.inc();
                Ok(locator)
            }
            Lookup::ClaimWon(token) => self.fetch_and_store(date, token).await,
            Lookup::ClaimLost | Lookup::Pending => self.wait_for_resolution(date).await,
        }
    }

    async fn lookup(&self, date: ImageDate) -> AcquireResult<Lookup> {
        let lookup = match self.records.get_image(date).await? {
            RecordState::Resolved(locator) => Lookup::Hit(locator),
            RecordState::Pending => Lookup::Pending,
            RecordState::Absent => {
                match self
                    .records
                    .claim_image(date, OffsetDateTime::now_utc())
                    .await?
                {
                    ClaimOutcome::Claimed(token) => Lookup::ClaimWon(token),
                    ClaimOutcome::AlreadyClaimed => Lookup::ClaimLost,
                }
            }
        };
        tracing::debug!(%date, ?lookup, "looked up image record");
        Ok(lookup)
    }

    async fn wait_for_resolution(&self, date: ImageDate) -> Outcome {
        let attempts = self.settings.poll_attempts;
        for attempt in 1..=attempts {
            let state = self.records.get_image(date).await?;
            if let ControlFlow::Break(outcome) = poll_step(date, state) {
                return outcome;
            }
            if attempt < attempts {
                tokio::time::sleep(self.settings.poll_interval()).await;
            }
        }

        metrics::PENDING_TIMEOUTS.inc();
        tracing::warn!(
            %date,
            attempts,
            "image still pending after polling budget; its claim may be stuck"
        );
        Err(AcquireError::PendingTimeout { date, attempts })
    }

    /// Fetch, store, resolve. Runs only for the owner of the durable claim.
    async fn fetch_and_store(&self, date: ImageDate, token: ClaimToken) -> Outcome {
        let timer = metrics::FETCH_DURATION.start_timer();
        let mut stored_name = None;
        let result = self.store_fresh(date, token, &mut stored_name).await;
        timer.observe_duration();

        match result {
            Ok(locator) => {
                tracing::info!(%date, %locator, "stored image");
                Ok(locator)
            }
            Err(err) => {
                metrics::FETCH_FAILURES.inc();
                Err(self.roll_back(date, token, err, stored_name).await)
            }
        }
    }

    async fn store_fresh(
        &self,
        date: ImageDate,
        token: ClaimToken,
        stored_name: &mut Option<String>,
    ) -> Outcome {
        let artifact = self.source.fetch(date).await?;
        let name = artifact.storage_filename();
        let content_type = artifact.storage_content_type();
        tracing::debug!(
            %date,
            source = self.source.source_name(),
            size = artifact.len(),
            %name,
            "fetched artifact"
        );

        self.ensure_bucket().await?;
        let locator = self
            .blobs
            .put(
                &self.settings.bucket,
                &name,
                artifact.bytes,
                content_type.as_deref(),
            )
            .await?;
        *stored_name = Some(name);

        self.records
            .resolve_image(date, token, &locator, OffsetDateTime::now_utc())
            .await?;
        Ok(locator)
    }

    async fn ensure_bucket(&self) -> AcquireResult<()> {
        self.bucket_ready
            .get_or_try_init(|| self.blobs.ensure_bucket(&self.settings.bucket))
            .await?;
        Ok(())
    }

    /// Return the record to absent after a failed fetch sequence.
    ///
    /// Only the row created by `token` is removed; if the claim was released
    /// and someone else claimed the date since, their row stays.
    async fn roll_back(
        &self,
        date: ImageDate,
        token: ClaimToken,
        original: AcquireError,
        stored_name: Option<String>,
    ) -> AcquireError {
        tracing::warn!(%date, error = %original, "acquisition failed; releasing claim");

        // Only set once the blob is written, so the record write is what failed.
        if let Some(name) = stored_name
            && let Err(e) = self.blobs.delete(&self.settings.bucket, &name).await
        {
            tracing::warn!(%date, %name, error = %e, "failed to delete orphaned blob");
        }

        match self.records.unclaim_image(date, token).await {
            Ok(()) => original,
            Err(rollback) => {
                metrics::ROLLBACK_FAILURES.inc();
                tracing::error!(
                    %date,
                    error = %original,
                    rollback_error = %rollback,
                    "failed to release claim; record stays pending until stale-claim recovery"
                );
                AcquireError::RollbackFailed {
                    original: Box::new(original),
                    rollback: Arc::new(rollback),
                }
            }
        }
    }
}

/// Stop predicate for polling: settle on resolved or absent, keep going on pending.
fn poll_step(date: ImageDate, state: RecordState) -> ControlFlow<Outcome> {
    match state {
        RecordState::Resolved(locator) => ControlFlow::Break(Ok(locator)),
        RecordState::Absent => ControlFlow::Break(Err(AcquireError::NotResolved { date })),
        RecordState::Pending => ControlFlow::Continue(()),
    }
}
