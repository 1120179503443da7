use std::sync::Arc;
use std::time::Duration;

use flashsale::Admission;
use flashsale::BackingStore;
use flashsale::FlashSaleBuilder;
use flashsale::MemoryBackingStore;
use flashsale::MemorySharedStore;
use flashsale::ReadFrom;
use flashsale::RejectReason;
use flashsale::SharedStore;
use tempfile::tempdir;
use tokio::sync::watch;

use crate::common::build_sale;
use crate::common::enable_logger;
use crate::common::fast_config;
use crate::common::open_voucher;
use crate::common::wait_until;

/// Entries delivered to a consumer that died before acknowledging them are
/// persisted by the next worker started under the same consumer name.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restarted_worker_replays_unacknowledged_orders() {
    enable_logger();
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let store = Arc::new(MemorySharedStore::new());
    let backing = Arc::new(MemoryBackingStore::new());
    let sale = build_sale(config.clone(), store.clone(), backing.clone()).await;

    sale.gate().publish(&open_voucher(3, 10)).await.unwrap();
    for user_id in 1..=4u64 {
        sale.gate().admit(3, user_id).await.unwrap();
    }

    // the crashed predecessor took delivery of two entries and never acked them
    let fulfillment = &config.fulfillment;
    let delivered = store
        .xread_group(
            &fulfillment.stream,
            &fulfillment.group,
            &fulfillment.consumer,
            ReadFrom::New,
            2,
            None,
        )
        .await
        .unwrap();
    assert_eq!(delivered.len(), 2);
    assert_eq!(
        store
            .xpending_count(&fulfillment.stream, &fulfillment.group, &fulfillment.consumer)
            .await
            .unwrap(),
        2
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let worker = sale.start_fulfillment(shutdown_rx).unwrap();

    wait_until(Duration::from_secs(5), || {
        let backing = backing.clone();
        async move { backing.order_len() == 4 }
    })
    .await;
    wait_until(Duration::from_secs(5), || {
        let store = store.clone();
        let fulfillment = fulfillment.clone();
        async move {
            store
                .xpending_count(&fulfillment.stream, &fulfillment.group, &fulfillment.consumer)
                .await
                .unwrap()
                == 0
        }
    })
    .await;
    assert_eq!(backing.load_voucher(3).await.unwrap().unwrap().stock, 6);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

/// A shared store outage fails admissions loudly and stalls the worker;
/// both resume once the store is back.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orders_wait_out_a_shared_store_outage() {
    enable_logger();
    let dir = tempdir().unwrap();
    let store = Arc::new(MemorySharedStore::new());
    let backing = Arc::new(MemoryBackingStore::new());
    let sale = build_sale(fast_config(dir.path()), store.clone(), backing.clone()).await;
    sale.gate().publish(&open_voucher(4, 10)).await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let worker = sale.start_fulfillment(shutdown_rx).unwrap();

    sale.gate().admit(4, 1).await.unwrap();
    wait_until(Duration::from_secs(5), || {
        let backing = backing.clone();
        async move { backing.order_len() == 1 }
    })
    .await;

    store.set_available(false);
    assert!(sale.gate().admit(4, 2).await.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.set_available(true);

    sale.gate().admit(4, 2).await.unwrap();
    wait_until(Duration::from_secs(5), || {
        let backing = backing.clone();
        async move { backing.order_len() == 2 }
    })
    .await;
    assert_eq!(backing.load_voucher(4).await.unwrap().unwrap().stock, 8);

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}

/// With the default sled stores, admissions outlive the process: stock,
/// purchase markers and queued orders are all there after a restart, and
/// the new worker persists what the old one never got to.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_admitted_orders_survive_process_restart() {
    enable_logger();
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    {
        let sale = FlashSaleBuilder::new(config.clone()).build().await.unwrap();
        sale.gate().publish(&open_voucher(5, 3)).await.unwrap();
        for user_id in [1u64, 2] {
            let admission = sale.gate().admit(5, user_id).await.unwrap();
            assert!(admission.order_id().is_some());
        }

        // the worker took one entry and went down with the process
        let fulfillment = &config.fulfillment;
        let delivered = sale
            .shared_store()
            .xread_group(
                &fulfillment.stream,
                &fulfillment.group,
                &fulfillment.consumer,
                ReadFrom::New,
                1,
                None,
            )
            .await
            .unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(sale.backing_store().count_orders(1, 5).await.unwrap(), 0);
    }

    let sale = FlashSaleBuilder::new(config.clone()).build().await.unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let worker = sale.start_fulfillment(shutdown_rx).unwrap();

    let backing = sale.backing_store();
    wait_until(Duration::from_secs(5), || {
        let backing = backing.clone();
        async move {
            backing.count_orders(1, 5).await.unwrap() == 1
                && backing.count_orders(2, 5).await.unwrap() == 1
        }
    })
    .await;
    assert_eq!(backing.load_voucher(5).await.unwrap().unwrap().stock, 1);

    assert_eq!(
        sale.gate().admit(5, 1).await.unwrap(),
        Admission::Rejected(RejectReason::AlreadyPurchased)
    );
    assert!(matches!(
        sale.gate().admit(5, 3).await.unwrap(),
        Admission::Admitted { .. }
    ));
    assert_eq!(
        sale.gate().admit(5, 4).await.unwrap(),
        Admission::Rejected(RejectReason::OutOfStock)
    );

    shutdown_tx.send(()).unwrap();
    worker.await.unwrap();
}
