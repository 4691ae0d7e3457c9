//! Database models mapping to the metadata schema.

use crate::repos::ClaimToken;
use almanac_core::ImageDate;
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// One row of the `images` table.
///
/// `locator IS NULL` marks a pending claim; a non-null locator marks the
/// image as resolved.
#[derive(Debug, Clone, FromRow)]
pub struct ImageRow {
    pub image_date: Date,
    pub locator: Option<String>,
    pub claimed_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
    /// Identifies the claim that created this row.
    pub claim_token: Uuid,
}

impl ImageRow {
    /// Key of this row.
    pub fn date(&self) -> ImageDate {
        ImageDate::new(self.image_date)
    }

    pub fn claim_token(&self) -> ClaimToken {
        ClaimToken::from(self.claim_token)
    }
}

/// A resolved image as returned by album listings.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ResolvedImageRow {
    pub image_date: Date,
    pub locator: String,
}

impl ResolvedImageRow {
    /// Key of this row.
    pub fn date(&self) -> ImageDate {
        ImageDate::new(self.image_date)
    }
}
