use chrono::Duration;
use chrono::Utc;

use crate::SeckillVoucher;
use crate::Shop;
use crate::VoucherOrder;

pub fn shop(id: u64) -> Shop {
    Shop {
        id: Some(id),
        name: format!("shop-{id}"),
        type_id: 1,
        area: "Downtown".to_string(),
        address: "1 Main St".to_string(),
        avg_price: 80,
        sold: 0,
        comments: 0,
        score: 45,
        open_hours: "10:00-22:00".to_string(),
    }
}

/// A voucher whose sale window is currently open.
pub fn voucher(
    voucher_id: u64,
    stock: i64,
) -> SeckillVoucher {
    let now = Utc::now();
    SeckillVoucher {
        voucher_id,
        stock,
        begin_time: now - Duration::hours(1),
        end_time: now + Duration::hours(1),
    }
}

pub fn order(
    id: i64,
    user_id: u64,
    voucher_id: u64,
) -> VoucherOrder {
    VoucherOrder {
        id,
        user_id,
        voucher_id,
        create_time: Utc::now(),
    }
}
