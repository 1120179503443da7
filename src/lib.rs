//! Flash-sale purchase core.
//!
//! Admission runs as one atomic step in a shared key/value store and hands
//! admitted orders to a durable stream. A single fulfillment worker drains
//! that stream into the backing store. Cache-aside reads, ownership-safe
//! locks, composite ids and login sessions share the same store.

mod admission;
mod cache;
mod config;
pub mod constants;
mod errors;
mod fulfillment;
mod id;
mod lock;
pub mod metrics;
mod node;
mod session;
mod shop;
mod storage;
mod store;
pub mod utils;

pub use admission::*;
pub use cache::*;
pub use config::*;
pub use errors::*;
pub use fulfillment::*;
pub use id::*;
pub use lock::*;
pub use node::*;
pub use session::*;
pub use shop::*;
pub use storage::*;
pub use store::*;
#[cfg(test)]
pub use utils::time::MockClock;
pub use utils::time::Clock;
pub use utils::time::SystemClock;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
