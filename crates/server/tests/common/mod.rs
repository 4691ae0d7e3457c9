//! Common test utilities and fixtures.

pub mod server;
pub mod source;

#[allow(unused_imports)]
pub use server::*;
#[allow(unused_imports)]
pub use source::*;
