pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{TestEnv, day, test_settings};
#[allow(unused_imports)]
pub use mocks::{FlakyRecords, InstrumentedBlobStore, MockSource};
