//! Artifact source trait.

use crate::error::SourceResult;
use almanac_core::{Artifact, ImageDate};
use async_trait::async_trait;

/// Something that can produce the artifact for a date.
///
/// Implementations hit the network; callers are expected to call `fetch`
/// at most once per pending record.
#[async_trait]
pub trait ArtifactSource: Send + Sync + 'static {
    /// Fetch the artifact published for `date`.
    async fn fetch(&self, date: ImageDate) -> SourceResult<Artifact>;

    /// Static identifier used in logs.
    fn source_name(&self) -> &'static str;
}
