use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::BackingStore;
use crate::Error;
use crate::PlaceOutcome;
use crate::Result;
use crate::SeckillVoucher;
use crate::Shop;
use crate::VoucherOrder;

#[derive(Debug, Default)]
struct Tables {
    shops: HashMap<u64, Shop>,
    vouchers: HashMap<u64, SeckillVoucher>,
    orders: HashMap<i64, VoucherOrder>,
}

impl Tables {
    fn count_orders(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> u64 {
        self.orders
            .values()
            .filter(|o| o.user_id == user_id && o.voucher_id == voucher_id)
            .count() as u64
    }

    fn decrement(
        &mut self,
        voucher_id: u64,
    ) -> bool {
        match self.vouchers.get_mut(&voucher_id) {
            Some(voucher) if voucher.stock > 0 => {
                voucher.stock -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-memory backing store. One mutex guards all tables, so every operation
/// (including `place_order`) is a transaction.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    tables: Mutex<Tables>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_len(&self) -> usize {
        self.tables.lock().orders.len()
    }
}

fn shop_id(shop: &Shop) -> Result<u64> {
    shop.id
        .ok_or_else(|| Error::InvalidArgument("shop id cannot be empty".to_string()))
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn load_shop(
        &self,
        id: u64,
    ) -> Result<Option<Shop>> {
        Ok(self.tables.lock().shops.get(&id).cloned())
    }

    async fn save_shop(
        &self,
        shop: &Shop,
    ) -> Result<()> {
        let id = shop_id(shop)?;
        self.tables.lock().shops.insert(id, shop.clone());
        Ok(())
    }

    async fn update_shop(
        &self,
        shop: &Shop,
    ) -> Result<bool> {
        let id = shop_id(shop)?;
        let mut tables = self.tables.lock();
        match tables.shops.get_mut(&id) {
            Some(row) => {
                *row = shop.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_voucher(
        &self,
        voucher: &SeckillVoucher,
    ) -> Result<()> {
        self.tables
            .lock()
            .vouchers
            .insert(voucher.voucher_id, voucher.clone());
        Ok(())
    }

    async fn load_voucher(
        &self,
        voucher_id: u64,
    ) -> Result<Option<SeckillVoucher>> {
        Ok(self.tables.lock().vouchers.get(&voucher_id).cloned())
    }

    async fn decrement_stock_if_positive(
        &self,
        voucher_id: u64,
    ) -> Result<bool> {
        Ok(self.tables.lock().decrement(voucher_id))
    }

    async fn insert_order(
        &self,
        order: &VoucherOrder,
    ) -> Result<bool> {
        let mut tables = self.tables.lock();
        if tables.orders.contains_key(&order.id) {
            return Ok(false);
        }
        tables.orders.insert(order.id, order.clone());
        Ok(true)
    }

    async fn count_orders(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<u64> {
        Ok(self.tables.lock().count_orders(user_id, voucher_id))
    }

    async fn place_order(
        &self,
        order: &VoucherOrder,
    ) -> Result<PlaceOutcome> {
        let mut tables = self.tables.lock();
        if tables.count_orders(order.user_id, order.voucher_id) > 0
            || tables.orders.contains_key(&order.id)
        {
            debug!("order {} duplicates an existing row", order.id);
            return Ok(PlaceOutcome::Duplicate);
        }
        if !tables.decrement(order.voucher_id) {
            return Ok(PlaceOutcome::OutOfStock);
        }
        tables.orders.insert(order.id, order.clone());
        Ok(PlaceOutcome::Placed)
    }
}
