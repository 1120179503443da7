use std::sync::Arc;
use std::time::Duration;

use flashsale::BackingStore;
use flashsale::MemoryBackingStore;
use flashsale::MemorySharedStore;
use flashsale::SharedStore;
use flashsale::NULL_SENTINEL;
use tempfile::tempdir;

use crate::common::build_sale;
use crate::common::enable_logger;
use crate::common::fast_config;
use crate::common::shop;

#[tokio::test]
async fn test_update_is_visible_on_next_read() {
    enable_logger();
    let dir = tempdir().unwrap();
    let backing = Arc::new(MemoryBackingStore::new());
    backing.save_shop(&shop(1)).await.unwrap();
    let sale = build_sale(
        fast_config(dir.path()),
        Arc::new(MemorySharedStore::new()),
        backing.clone(),
    )
    .await;
    let shops = sale.shops();

    assert_eq!(shops.query_by_id(1).await.unwrap(), Some(shop(1)));

    let mut renamed = shop(1);
    renamed.name = "Tea House Reloaded".to_string();
    assert!(shops.update(&renamed).await.unwrap());

    assert_eq!(shops.query_by_id(1).await.unwrap(), Some(renamed.clone()));
    assert_eq!(shops.query_exclusive(1).await.unwrap(), Some(renamed));
}

#[tokio::test]
async fn test_unknown_shop_is_cached_as_missing() {
    enable_logger();
    let dir = tempdir().unwrap();
    let store = Arc::new(MemorySharedStore::new());
    let sale = build_sale(
        fast_config(dir.path()),
        store.clone(),
        Arc::new(MemoryBackingStore::new()),
    )
    .await;

    assert_eq!(sale.shops().query_by_id(404).await.unwrap(), None);

    let key = format!("{}404", sale.config().cache.shop_key_prefix);
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(NULL_SENTINEL));
    let ttl = store.ttl(&key).unwrap();
    assert!(ttl <= Duration::from_secs(sale.config().cache.null_ttl_secs));
}

#[tokio::test]
async fn test_hot_shop_served_after_warm_up() {
    enable_logger();
    let dir = tempdir().unwrap();
    let backing = Arc::new(MemoryBackingStore::new());
    backing.save_shop(&shop(8)).await.unwrap();
    let sale = build_sale(
        fast_config(dir.path()),
        Arc::new(MemorySharedStore::new()),
        backing,
    )
    .await;
    let shops = sale.shops();

    assert_eq!(shops.query_hot(8).await.unwrap(), None);
    assert!(shops.warm_up(8, Duration::from_secs(60)).await.unwrap());
    assert!(!shops.warm_up(9, Duration::from_secs(60)).await.unwrap());
    assert_eq!(shops.query_hot(8).await.unwrap(), Some(shop(8)));
}
