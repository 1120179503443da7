//! Shared helpers for unit tests.
mod clock;
mod common;
mod fixtures;

pub use clock::*;
pub use common::*;
pub use fixtures::*;
