//! Cache-aside read strategies over the shared store.
//!
//! - pass-through: caches "not found" as an empty sentinel with a short TTL
//!   so missing ids stop reaching the backing store (penetration).
//! - logical expiry: hot keys never physically expire; stale values are
//!   served while a single background rebuild refreshes them (breakdown).
//! - mutex: bounded blocking variant where one caller loads and the others
//!   back off and re-read.

mod cache_client;
mod rebuild_pool;


pub use cache_client::*;
pub(crate) use rebuild_pool::*;
