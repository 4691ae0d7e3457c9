//! Core domain types and shared logic for the Almanac image cache.
//!
//! This crate defines the data model used across all other crates:
//! - Image date keys
//! - Fetched artifacts and the storage-name policy
//! - Application configuration

pub mod artifact;
pub mod config;
pub mod date;
pub mod error;

pub use artifact::Artifact;
pub use date::ImageDate;
pub use error::{Error, Result};
