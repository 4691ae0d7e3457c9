//! Coalescing acquisition cache for Almanac.
//!
//! Ties the record store, the blob store and an artifact source together:
//! a date is fetched upstream at most once per pending episode, stored as a
//! blob, and answered from the record store afterwards.

pub mod cache;
pub mod error;
pub mod metrics;
mod registry;

pub use cache::{AcquisitionCache, ResolvedImage};
pub use error::{AcquireError, AcquireResult};
