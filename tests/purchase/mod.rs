use std::sync::Arc;
use std::time::Duration;

use flashsale::Admission;
use flashsale::BackingStore;
use flashsale::MemoryBackingStore;
use flashsale::MemorySharedStore;
use flashsale::RejectReason;
use flashsale::SharedStore;
use flashsale::SledBackingStore;
use tempfile::tempdir;
use tokio::sync::watch;

use crate::common::build_sale;
use crate::common::buyer;
use crate::common::enable_logger;
use crate::common::fast_config;
use crate::common::open_voucher;
use crate::common::wait_until;

const VOUCHER_ID: u64 = 10;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_never_oversell() {
    enable_logger();
    let dir = tempdir().unwrap();
    let store = Arc::new(MemorySharedStore::new());
    let backing = Arc::new(MemoryBackingStore::new());
    let sale = build_sale(fast_config(dir.path()), store.clone(), backing.clone()).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let worker = sale.start_fulfillment(shutdown_rx).unwrap();

    sale.gate().publish(&open_voucher(VOUCHER_ID, 50)).await.unwrap();

    let mut handles = Vec::new();
    for user_id in 1..=200u64 {
        let gate = sale.gate();
        handles.push(tokio::spawn(async move {
            gate.admit(VOUCHER_ID, user_id).await.unwrap()
        }));
    }
    let mut admitted = 0;
    let mut sold_out = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Admission::Admitted { .. } => admitted += 1,
            Admission::Rejected(RejectReason::OutOfStock) => sold_out += 1,
            other => panic!("unexpected admission {other:?}"),
        }
    }
    assert_eq!(admitted, 50);
    assert_eq!(sold_out, 150);

    wait_until(Duration::from_secs(10), || {
        let backing = backing.clone();
        async move { backing.order_len() == 50 }
    })
    .await;
    let voucher = backing.load_voucher(VOUCHER_ID).await.unwrap().unwrap();
    assert_eq!(voucher.stock, 0);
    let stock_key = format!("{}{VOUCHER_ID}", sale.config().admission.stock_key_prefix);
    assert_eq!(store.get(&stock_key).await.unwrap().as_deref(), Some("0"));

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_logged_in_buyer_gets_one_order() {
    enable_logger();
    let dir = tempdir().unwrap();
    let backing = Arc::new(MemoryBackingStore::new());
    let sale = build_sale(
        fast_config(dir.path()),
        Arc::new(MemorySharedStore::new()),
        backing.clone(),
    )
    .await;
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let worker = sale.start_fulfillment(shutdown_rx).unwrap();
    sale.gate().publish(&open_voucher(VOUCHER_ID, 5)).await.unwrap();

    let token = sale.sessions().save(&buyer(7)).await.unwrap();
    let caller = sale.sessions().resolve(&token).await.unwrap().unwrap();

    let first = sale.gate().admit_for(&caller, VOUCHER_ID).await.unwrap();
    let second = sale.gate().admit_for(&caller, VOUCHER_ID).await.unwrap();
    assert!(first.order_id().is_some());
    assert_eq!(second, Admission::Rejected(RejectReason::AlreadyPurchased));

    wait_until(Duration::from_secs(5), || {
        let backing = backing.clone();
        async move { backing.count_orders(7, VOUCHER_ID).await.unwrap() == 1 }
    })
    .await;
    assert_eq!(
        backing.load_voucher(VOUCHER_ID).await.unwrap().unwrap().stock,
        4
    );

    sale.sessions().remove(&token).await.unwrap();
    assert!(sale.sessions().resolve(&token).await.unwrap().is_none());

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orders_survive_backing_store_restart() {
    enable_logger();
    let dir = tempdir().unwrap();
    let db_dir = dir.path().join("db");
    {
        let backing = Arc::new(SledBackingStore::open(&db_dir).unwrap());
        let sale = build_sale(
            fast_config(dir.path()),
            Arc::new(MemorySharedStore::new()),
            backing.clone(),
        )
        .await;
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let worker = sale.start_fulfillment(shutdown_rx).unwrap();
        sale.gate().publish(&open_voucher(VOUCHER_ID, 3)).await.unwrap();

        for user_id in [1u64, 2] {
            let admission = sale.gate().admit(VOUCHER_ID, user_id).await.unwrap();
            assert!(admission.order_id().is_some());
        }
        wait_until(Duration::from_secs(5), || {
            let backing = backing.clone();
            async move { backing.count_orders(2, VOUCHER_ID).await.unwrap() == 1 }
        })
        .await;

        shutdown_tx.send(()).unwrap();
        worker.await.unwrap();
        backing.flush().unwrap();
    }

    let reopened = SledBackingStore::open(&db_dir).unwrap();
    assert_eq!(reopened.count_orders(1, VOUCHER_ID).await.unwrap(), 1);
    assert_eq!(reopened.count_orders(2, VOUCHER_ID).await.unwrap(), 1);
    assert_eq!(
        reopened.load_voucher(VOUCHER_ID).await.unwrap().unwrap().stock,
        1
    );
}
