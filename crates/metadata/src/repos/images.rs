//! Image record repository.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{ImageRow, ResolvedImageRow};
use almanac_core::ImageDate;
use async_trait::async_trait;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Proof of ownership for one pending episode.
///
/// Issued by `claim_image` and required by `resolve_image` and
/// `unclaim_image`, so a claim that was released (for example by stale-claim
/// recovery) can no longer touch the row of whoever claimed the date next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClaimToken(Uuid);

impl ClaimToken {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ClaimToken {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClaimToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of an attempt to claim a date for fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A pending row was inserted; the caller owns the fetch.
    Claimed(ClaimToken),
    /// A row already existed (pending or resolved); someone else owns it.
    AlreadyClaimed,
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

/// Observable state of one date in the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// No row.
    Absent,
    /// Claimed, no locator yet.
    Pending,
    /// Stored; carries the locator.
    Resolved(String),
}

impl RecordState {
    /// Short lowercase label used in logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            RecordState::Absent => "absent",
            RecordState::Pending => "pending",
            RecordState::Resolved(_) => "resolved",
        }
    }

    pub(crate) fn from_row(row: Option<ImageRow>) -> Self {
        match row {
            None => RecordState::Absent,
            Some(ImageRow {
                locator: Some(locator),
                ..
            }) => RecordState::Resolved(locator),
            Some(_) => RecordState::Pending,
        }
    }
}

/// Repository for date-keyed image records.
///
/// Valid transitions are absent -> pending (`claim_image`),
/// pending -> resolved (`resolve_image`) and pending -> absent
/// (`unclaim_image`, `release_stale_claims`). A resolved row is never
/// reverted. Resolve and unclaim only act on the row created by the claim
/// whose token they carry.
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Atomically insert a pending row if none exists for `date`.
    async fn claim_image(
        &self,
        date: ImageDate,
        claimed_at: OffsetDateTime,
    ) -> MetadataResult<ClaimOutcome>;

    /// Attach a locator to the pending row owned by `token`.
    ///
    /// Resolving an already-resolved row of the same claim with the same
    /// locator is a no-op; a different locator is rejected with `Constraint`.
    /// Missing rows give `NotFound`, rows owned by another claim give
    /// `ClaimSuperseded`.
    async fn resolve_image(
        &self,
        date: ImageDate,
        token: ClaimToken,
        locator: &str,
        resolved_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete the pending row owned by `token`.
    ///
    /// Absent rows and rows owned by another claim are left alone and count
    /// as success; a row this claim already resolved is refused.
    async fn unclaim_image(&self, date: ImageDate, token: ClaimToken) -> MetadataResult<()>;

    /// Read the raw row for a date.
    async fn get_image_row(&self, date: ImageDate) -> MetadataResult<Option<ImageRow>>;

    /// Read the state of a date.
    async fn get_image(&self, date: ImageDate) -> MetadataResult<RecordState> {
        Ok(RecordState::from_row(self.get_image_row(date).await?))
    }

    /// All resolved images, ordered by date ascending. Pending rows are excluded.
    async fn list_resolved_images(&self) -> MetadataResult<Vec<ResolvedImageRow>>;

    /// Delete pending rows claimed before `older_than`. Returns how many were released.
    async fn release_stale_claims(&self, older_than: OffsetDateTime) -> MetadataResult<u64>;
}

/// Decide the outcome of a resolve that updated no rows, given the row as it
/// is now.
pub(crate) fn settle_unmatched_resolve(
    date: ImageDate,
    token: ClaimToken,
    locator: &str,
    current: Option<ImageRow>,
) -> MetadataResult<()> {
    let Some(row) = current else {
        return Err(MetadataError::NotFound(format!(
            "no pending claim for image {date}"
        )));
    };
    if row.claim_token() != token {
        return Err(MetadataError::ClaimSuperseded(format!(
            "claim {token} on image {date} was released and replaced by {}",
            row.claim_token()
        )));
    }
    match row.locator {
        Some(existing) if existing == locator => Ok(()),
        Some(existing) => Err(MetadataError::Constraint(format!(
            "image {date} already resolved to {existing}, refusing {locator}"
        ))),
        None => Err(MetadataError::Internal(format!(
            "pending row for image {date} was not updated"
        ))),
    }
}

/// Decide the outcome of an unclaim that deleted no rows.
pub(crate) fn settle_unmatched_unclaim(
    date: ImageDate,
    token: ClaimToken,
    current: Option<ImageRow>,
) -> MetadataResult<()> {
    match current {
        None => Ok(()),
        Some(row) if row.claim_token() != token => {
            tracing::debug!(
                %date,
                %token,
                current = %row.claim_token(),
                "claim already replaced; leaving the newer row alone"
            );
            Ok(())
        }
        Some(row) => {
            let state = RecordState::from_row(Some(row));
            Err(MetadataError::InvalidStateTransition {
                from: format!("{} ({date})", state.label()),
                to: "absent".to_string(),
            })
        }
    }
}

/// Reject locators no blob store would hand out.
pub(crate) fn check_locator(date: ImageDate, locator: &str) -> MetadataResult<()> {
    if locator.trim().is_empty() {
        return Err(MetadataError::Constraint(format!(
            "empty locator for image {date}"
        )));
    }
    Ok(())
}
