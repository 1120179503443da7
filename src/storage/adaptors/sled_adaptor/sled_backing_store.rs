//! Sled-backed relational tables.
//!
//! Rows are bincode encoded and keyed by big-endian ids. A secondary index
//! `(user_id, voucher_id) -> order_id` backs the per-user dedup check.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::ConflictableTransactionResult;
use sled::transaction::TransactionError;
use sled::transaction::TransactionalTree;
use sled::Transactional;
use tracing::debug;
use tracing::warn;

use crate::constants::ORDER_TREE;
use crate::constants::SHOP_TREE;
use crate::constants::USER_ORDER_INDEX_TREE;
use crate::constants::VOUCHER_TREE;
use crate::init_sled_backing_db;
use crate::BackingStore;
use crate::Error;
use crate::PlaceOutcome;
use crate::Result;
use crate::SeckillVoucher;
use crate::Shop;
use crate::StorageError;
use crate::VoucherOrder;

type TxResult<T> = ConflictableTransactionResult<T, bincode::Error>;

pub struct SledBackingStore {
    db: sled::Db,
    shops: sled::Tree,
    vouchers: sled::Tree,
    orders: sled::Tree,
    user_index: sled::Tree,
}

impl std::fmt::Debug for SledBackingStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledBackingStore")
            .field("shops", &self.shops.len())
            .field("vouchers", &self.vouchers.len())
            .field("orders", &self.orders.len())
            .finish()
    }
}

fn user_voucher_key(
    user_id: u64,
    voucher_id: u64,
) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&user_id.to_be_bytes());
    key[8..].copy_from_slice(&voucher_id.to_be_bytes());
    key
}

fn decode<T: DeserializeOwned>(
    location: &str,
    bytes: &[u8],
) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| {
        warn!("failed to decode row in {location}: {e:?}");
        Error::Storage(StorageError::DataCorruption {
            location: location.to_string(),
        })
    })
}

fn encode_tx<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    bincode::serialize(value).map_err(ConflictableTransactionError::Abort)
}

fn decode_tx<T: DeserializeOwned>(bytes: &[u8]) -> TxResult<T> {
    bincode::deserialize(bytes).map_err(ConflictableTransactionError::Abort)
}

fn into_storage_error(e: TransactionError<bincode::Error>) -> Error {
    match e {
        TransactionError::Abort(e) => Error::Storage(StorageError::BincodeError(e)),
        TransactionError::Storage(e) => Error::Storage(StorageError::Transaction(e.to_string())),
    }
}

/// Decrements stock inside an open transaction. Returns false when the
/// voucher is missing or sold out.
fn decrement_in_tx(
    vouchers: &TransactionalTree,
    voucher_id: u64,
) -> TxResult<bool> {
    let key = voucher_id.to_be_bytes();
    let Some(raw) = vouchers.get(&key[..])? else {
        return Ok(false);
    };
    let mut voucher: SeckillVoucher = decode_tx(&raw)?;
    if voucher.stock <= 0 {
        return Ok(false);
    }
    voucher.stock -= 1;
    vouchers.insert(&key[..], encode_tx(&voucher)?)?;
    Ok(true)
}

fn insert_order_in_tx(
    orders: &TransactionalTree,
    user_index: &TransactionalTree,
    order: &VoucherOrder,
) -> TxResult<()> {
    let order_key = order.id.to_be_bytes();
    orders.insert(&order_key[..], encode_tx(order)?)?;
    user_index.insert(
        &user_voucher_key(order.user_id, order.voucher_id)[..],
        &order_key[..],
    )?;
    Ok(())
}

impl SledBackingStore {
    pub fn new(db: sled::Db) -> Result<Self> {
        let shops = db.open_tree(SHOP_TREE)?;
        let vouchers = db.open_tree(VOUCHER_TREE)?;
        let orders = db.open_tree(ORDER_TREE)?;
        let user_index = db.open_tree(USER_ORDER_INDEX_TREE)?;
        Ok(Self {
            db,
            shops,
            vouchers,
            orders,
            user_index,
        })
    }

    pub fn open(db_root_dir: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let db = init_sled_backing_db(db_root_dir)?;
        Self::new(db)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn shop_row(shop: &Shop) -> Result<(u64, Vec<u8>)> {
        let id = shop
            .id
            .ok_or_else(|| Error::InvalidArgument("shop id cannot be empty".to_string()))?;
        Ok((id, bincode::serialize(shop)?))
    }
}

#[async_trait]
impl BackingStore for SledBackingStore {
    async fn load_shop(
        &self,
        id: u64,
    ) -> Result<Option<Shop>> {
        match self.shops.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(decode(SHOP_TREE, &raw)?)),
            None => Ok(None),
        }
    }

    async fn save_shop(
        &self,
        shop: &Shop,
    ) -> Result<()> {
        let (id, row) = Self::shop_row(shop)?;
        self.shops.insert(id.to_be_bytes(), row)?;
        Ok(())
    }

    async fn update_shop(
        &self,
        shop: &Shop,
    ) -> Result<bool> {
        let (id, row) = Self::shop_row(shop)?;
        let key = id.to_be_bytes();
        self.shops
            .transaction(|tx| -> TxResult<bool> {
                if tx.get(&key[..])?.is_none() {
                    return Ok(false);
                }
                tx.insert(&key[..], row.clone())?;
                Ok(true)
            })
            .map_err(into_storage_error)
    }

    async fn save_voucher(
        &self,
        voucher: &SeckillVoucher,
    ) -> Result<()> {
        self.vouchers
            .insert(voucher.voucher_id.to_be_bytes(), bincode::serialize(voucher)?)?;
        Ok(())
    }

    async fn load_voucher(
        &self,
        voucher_id: u64,
    ) -> Result<Option<SeckillVoucher>> {
        match self.vouchers.get(voucher_id.to_be_bytes())? {
            Some(raw) => Ok(Some(decode(VOUCHER_TREE, &raw)?)),
            None => Ok(None),
        }
    }

    async fn decrement_stock_if_positive(
        &self,
        voucher_id: u64,
    ) -> Result<bool> {
        self.vouchers
            .transaction(|tx| decrement_in_tx(tx, voucher_id))
            .map_err(into_storage_error)
    }

    async fn insert_order(
        &self,
        order: &VoucherOrder,
    ) -> Result<bool> {
        (&self.orders, &self.user_index)
            .transaction(|(orders, user_index)| -> TxResult<bool> {
                if orders.get(&order.id.to_be_bytes()[..])?.is_some() {
                    return Ok(false);
                }
                insert_order_in_tx(orders, user_index, order)?;
                Ok(true)
            })
            .map_err(into_storage_error)
    }

    async fn count_orders(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<u64> {
        let found = self
            .user_index
            .contains_key(user_voucher_key(user_id, voucher_id))?;
        Ok(found as u64)
    }

    async fn place_order(
        &self,
        order: &VoucherOrder,
    ) -> Result<PlaceOutcome> {
        let outcome = (&self.vouchers, &self.orders, &self.user_index)
            .transaction(
                |(vouchers, orders, user_index)| -> TxResult<PlaceOutcome> {
                    let index_key = user_voucher_key(order.user_id, order.voucher_id);
                    if user_index.get(&index_key[..])?.is_some()
                        || orders.get(&order.id.to_be_bytes()[..])?.is_some()
                    {
                        return Ok(PlaceOutcome::Duplicate);
                    }
                    if !decrement_in_tx(vouchers, order.voucher_id)? {
                        return Ok(PlaceOutcome::OutOfStock);
                    }
                    insert_order_in_tx(orders, user_index, order)?;
                    Ok(PlaceOutcome::Placed)
                },
            )
            .map_err(into_storage_error)?;

        debug!("place_order {} -> {:?}", order.id, outcome);
        Ok(outcome)
    }
}
