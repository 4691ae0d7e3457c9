//! Repository traits for metadata operations.

pub mod images;

pub use images::{ClaimOutcome, ClaimToken, ImageRepo, RecordState};
