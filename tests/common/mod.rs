use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flashsale::BackingStore;
use flashsale::FlashSale;
use flashsale::FlashSaleBuilder;
use flashsale::FlashSaleConfig;
use flashsale::MemorySharedStore;
use flashsale::SeckillVoucher;
use flashsale::Shop;
use flashsale::UserContext;
use tracing_subscriber::EnvFilter;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Short blocking reads and backoffs so workers react within milliseconds.
pub fn fast_config(db_root_dir: &Path) -> FlashSaleConfig {
    let mut config = FlashSaleConfig::default();
    config.storage.db_root_dir = db_root_dir.to_path_buf();
    config.fulfillment.block_ms = 50;
    config.fulfillment.recovery_backoff.base_delay_ms = 5;
    config.fulfillment.recovery_backoff.max_delay_ms = 20;
    config
}

pub async fn build_sale(
    config: FlashSaleConfig,
    store: Arc<MemorySharedStore>,
    backing: Arc<dyn BackingStore>,
) -> FlashSale {
    FlashSaleBuilder::new(config)
        .shared_store(store)
        .backing_store(backing)
        .build()
        .await
        .expect("build flash sale")
}

pub fn open_voucher(
    voucher_id: u64,
    stock: i64,
) -> SeckillVoucher {
    let now = Utc::now();
    SeckillVoucher {
        voucher_id,
        stock,
        begin_time: now - chrono::Duration::minutes(5),
        end_time: now + chrono::Duration::minutes(55),
    }
}

pub fn buyer(id: u64) -> UserContext {
    UserContext {
        id,
        nick_name: format!("user_{id}"),
        icon: String::new(),
    }
}

pub fn shop(id: u64) -> Shop {
    Shop {
        id: Some(id),
        name: format!("Tea House {id}"),
        type_id: 1,
        area: "Riverside".to_string(),
        address: format!("{id} Harbour Road"),
        avg_price: 60,
        sold: 100,
        comments: 12,
        score: 47,
        open_hours: "09:00-21:00".to_string(),
    }
}

/// Polls `check` until it holds, failing after `timeout`.
pub async fn wait_until<F, Fut>(
    timeout: Duration,
    mut check: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
