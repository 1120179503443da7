use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A merchant shop, served through the cache-aside read paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shop {
    pub id: Option<u64>,
    pub name: String,
    pub type_id: u64,
    pub area: String,
    pub address: String,
    pub avg_price: u64,
    pub sold: u32,
    pub comments: u32,
    /// Rating multiplied by 10
    pub score: u32,
    pub open_hours: String,
}

/// Flash-sale stock attached to a voucher.
///
/// The sale window is stored for the storefront. Admission does not read
/// it: callers decide when a voucher is on sale, and
/// [`AdmissionGate::publish`](crate::AdmissionGate::publish) only rejects a
/// window that ends before it begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeckillVoucher {
    pub voucher_id: u64,
    pub stock: i64,
    pub begin_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// An admitted voucher order. At most one exists per `(user_id, voucher_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherOrder {
    pub id: i64,
    pub user_id: u64,
    pub voucher_id: u64,
    pub create_time: DateTime<Utc>,
}
