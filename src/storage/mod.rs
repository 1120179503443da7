//! Backing relational store: the source of truth for shops, voucher stock
//! and persisted orders. Cache entries in the shared store are disposable
//! projections of what lives here.

mod adaptors;
mod entity;


use std::path::Path;

pub use adaptors::*;
use async_trait::async_trait;
pub use entity::*;
#[cfg(test)]
use mockall::automock;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::StorageError;

/// Result of the order unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Stock decremented and order row inserted
    Placed,
    /// An order for the same user and voucher already exists; nothing changed
    Duplicate,
    /// Voucher missing or stock exhausted; nothing changed
    OutOfStock,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn load_shop(
        &self,
        id: u64,
    ) -> Result<Option<Shop>>;

    /// Inserts or replaces a shop. The shop must carry an id.
    async fn save_shop(
        &self,
        shop: &Shop,
    ) -> Result<()>;

    /// Replaces an existing shop. Returns false when no row matched.
    async fn update_shop(
        &self,
        shop: &Shop,
    ) -> Result<bool>;

    async fn save_voucher(
        &self,
        voucher: &SeckillVoucher,
    ) -> Result<()>;

    async fn load_voucher(
        &self,
        voucher_id: u64,
    ) -> Result<Option<SeckillVoucher>>;

    /// `stock = stock - 1 WHERE voucher_id = ? AND stock > 0`
    async fn decrement_stock_if_positive(
        &self,
        voucher_id: u64,
    ) -> Result<bool>;

    /// Inserts an order row. Returns false if the order id is already taken.
    async fn insert_order(
        &self,
        order: &VoucherOrder,
    ) -> Result<bool>;

    async fn count_orders(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<u64>;

    /// Duplicate check, stock decrement and order insert as one
    /// all-or-nothing unit of work.
    async fn place_order(
        &self,
        order: &VoucherOrder,
    ) -> Result<PlaceOutcome>;
}

pub fn init_sled_backing_db(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, StorageError> {
    debug!("init_sled_backing_db from path: {:?}", &sled_db_root_path);

    let path = sled_db_root_path.as_ref();
    let db_path = path.join("backing_store");

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(256 * 1024 * 1024) //256MB
        .flush_every_ms(Some(10))
        .use_compression(true)
        .compression_factor(1)
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
