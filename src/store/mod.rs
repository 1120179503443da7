//! Shared low-latency key/value + streaming store.
//!
//! The flash-sale core uses this store both as a cache and as its coordination
//! substrate: locks, per-day counters, stock counters, purchase markers and
//! the durable order stream all live here. Multi-step operations that must
//! not interleave with other callers ([`SharedStore::admit`],
//! [`SharedStore::delete_if_equals`]) are evaluated server-side in one step.
//!
//! [`SledSharedStore`] keeps all of it on disk and is what a deployment runs
//! on. [`MemorySharedStore`] is the in-process variant for tests and
//! throwaway setups.

mod mem_shared_store;
mod sled_shared_store;
mod stream;
mod value;


use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
pub use mem_shared_store::*;
#[cfg(test)]
use mockall::automock;
pub use sled_shared_store::*;
pub use stream::*;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::StorageError;

/// Outcome codes of the atomic admission script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionCode {
    /// Stock decremented, purchase marked and queue entry appended
    Admitted,
    OutOfStock,
    AlreadyPurchased,
}

/// Arguments of the atomic admission script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRequest {
    /// Integer stock counter of the voucher
    pub stock_key: String,
    /// Set of buyers of the voucher
    pub order_key: String,
    /// Buyer recorded in `order_key`
    pub member: String,
    /// Stream receiving the queue entry on success
    pub stream: String,
    /// Queue entry payload
    pub fields: Vec<(String, String)>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SharedStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<String>>;

    /// Writes a string value. `ttl == None` stores it without expiry.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Writes only when the key is absent. Returns whether the write happened.
    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool>;

    async fn delete(
        &self,
        key: &str,
    ) -> Result<bool>;

    async fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Atomic increment; a missing key counts from 0.
    async fn incr(
        &self,
        key: &str,
    ) -> Result<i64>;

    /// All fields of a hash; empty when the key is missing.
    async fn hget_all(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>>;

    async fn hset_all(
        &self,
        key: &str,
        fields: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Deletes `key` only if it currently holds `expected`, in one step.
    async fn delete_if_equals(
        &self,
        key: &str,
        expected: &str,
    ) -> Result<bool>;

    /// Runs the admission check-and-mutate sequence in one step:
    /// duplicate check, stock check, decrement, purchase mark, enqueue.
    async fn admit(
        &self,
        request: AdmissionRequest,
    ) -> Result<AdmissionCode>;

    /// Creates `group` (and the stream if missing). Existing groups are kept.
    async fn xgroup_create(
        &self,
        stream: &str,
        group: &str,
    ) -> Result<()>;

    async fn xadd(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<StreamId>;

    /// Reads up to `count` entries for `consumer`.
    ///
    /// [`ReadFrom::New`] delivers undelivered entries, waiting up to `block` when
    /// none exist, and records them as pending for `consumer`.
    /// [`ReadFrom::Pending`] re-delivers the consumer's unacknowledged entries
    /// and never blocks.
    async fn xread_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        from: ReadFrom,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>>;

    async fn xack(
        &self,
        stream: &str,
        group: &str,
        ids: &[StreamId],
    ) -> Result<u64>;

    async fn xpending_count(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<usize>;
}

pub fn init_sled_shared_db(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, StorageError> {
    debug!("init_sled_shared_db from path: {:?}", &sled_db_root_path);

    let db_path = sled_db_root_path.as_ref().join("shared_store");

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(64 * 1024 * 1024) //64MB
        .flush_every_ms(Some(10))
        .mode(sled::Mode::HighThroughput)
        .open()
        .map_err(|e| {
            warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                db_path, e
            );
            StorageError::PathError {
                path: db_path.clone(),
                source: std::io::Error::other(e),
            }
        })
}
