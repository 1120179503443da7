// -
// Shared store key namespaces

/// Cached shop entities
pub const CACHE_SHOP_KEY: &str = "cache:shop:";

/// Every `DistributedLock` key lives under this prefix
pub const LOCK_KEY_PREFIX: &str = "lock:";

/// Per-user fulfillment lock names, stored as `lock:order:<user_id>`
pub const LOCK_ORDER_NAME: &str = "order:";

/// Per-day id counters: `icr:<sequence>:<yyyy:MM:dd>`
pub const ID_COUNTER_KEY_PREFIX: &str = "icr:";

/// Voucher stock counters: `seckill:stock:<voucher_id>`
pub const SECKILL_STOCK_KEY: &str = "seckill:stock:";

/// Purchase markers: `seckill:order:<voucher_id>` holds the buyer ids
pub const SECKILL_ORDER_KEY: &str = "seckill:order:";

/// Login sessions: `login:token:<token>`
pub const LOGIN_USER_KEY: &str = "login:token:";

// -
// Fulfillment stream

pub const ORDER_STREAM: &str = "stream.orders";
pub const ORDER_GROUP: &str = "g1";
pub const ORDER_CONSUMER: &str = "c1";

/// Queue entry field names
pub const FIELD_VOUCHER_ID: &str = "voucherId";
pub const FIELD_USER_ID: &str = "userId";
pub const FIELD_ORDER_ID: &str = "orderId";

/// Business sequence name for voucher orders
pub const ORDER_SEQUENCE: &str = "order";

// -
// Id layout

/// 2022-01-01T00:00:00Z. Never change: ids minted across the fleet compare by it.
pub const BEGIN_TIMESTAMP: i64 = 1_640_995_200;

/// Low-order bits reserved for the per-day counter
pub const COUNT_BITS: u32 = 32;

// -
// Sled trees

pub(crate) const SHOP_TREE: &str = "_shop_tree";
pub(crate) const VOUCHER_TREE: &str = "_seckill_voucher_tree";
pub(crate) const ORDER_TREE: &str = "_voucher_order_tree";
pub(crate) const USER_ORDER_INDEX_TREE: &str = "_user_voucher_order_index";

pub(crate) const SHARED_KV_TREE: &str = "_shared_kv_tree";
pub(crate) const SHARED_STREAM_ENTRY_TREE: &str = "_shared_stream_entry_tree";
pub(crate) const SHARED_STREAM_META_TREE: &str = "_shared_stream_meta_tree";
pub(crate) const SHARED_GROUP_TREE: &str = "_shared_consumer_group_tree";
pub(crate) const SHARED_PENDING_TREE: &str = "_shared_pending_tree";
