use std::collections::HashSet;
use std::sync::Arc;

use super::*;
use crate::constants::ORDER_GROUP;
use crate::constants::ORDER_STREAM;
use crate::test_utils::voucher;
use crate::AdmissionConfig;
use crate::BackingStore;
use crate::Error;
use crate::IdConfig;
use crate::IdGenerator;
use crate::MemoryBackingStore;
use crate::MemorySharedStore;
use crate::MockBackingStore;
use crate::MockSharedStore;
use crate::ReadFrom;
use crate::SharedStore;
use crate::StoreError;
use crate::SystemClock;
use crate::UserContext;

struct Harness {
    store: Arc<MemorySharedStore>,
    backing: Arc<MemoryBackingStore>,
    gate: Arc<AdmissionGate>,
}

fn gate_over(
    store: Arc<dyn SharedStore>,
    backing: Arc<dyn BackingStore>,
) -> AdmissionGate {
    let ids = Arc::new(IdGenerator::new(
        store.clone(),
        Arc::new(SystemClock),
        IdConfig::default(),
    ));
    AdmissionGate::new(
        store,
        backing,
        ids,
        AdmissionConfig::default(),
        ORDER_STREAM.to_string(),
    )
}

async fn harness() -> Harness {
    let store = Arc::new(MemorySharedStore::new());
    store.xgroup_create(ORDER_STREAM, ORDER_GROUP).await.unwrap();
    let backing = Arc::new(MemoryBackingStore::new());
    let gate = Arc::new(gate_over(store.clone(), backing.clone()));
    Harness {
        store,
        backing,
        gate,
    }
}

async fn queued(store: &MemorySharedStore) -> Vec<crate::StreamEntry> {
    store
        .xread_group(ORDER_STREAM, ORDER_GROUP, "inspector", ReadFrom::New, 10_000, None)
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_thousand_buyers_hundred_units() {
    let h = harness().await;
    h.gate.publish(&voucher(7, 100)).await.unwrap();

    let mut handles = Vec::new();
    for user in 0..1000u64 {
        let gate = h.gate.clone();
        handles.push(tokio::spawn(async move { gate.admit(7, user).await }));
    }
    let mut order_ids = HashSet::new();
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Admission::Admitted { order_id } => assert!(order_ids.insert(order_id)),
            Admission::Rejected(RejectReason::OutOfStock) => out_of_stock += 1,
            other => panic!("unexpected {other:?}"),
        }
    }

    assert_eq!(order_ids.len(), 100);
    assert_eq!(out_of_stock, 900);
    assert_eq!(
        h.store.get("seckill:stock:7").await.unwrap().as_deref(),
        Some("0")
    );
    assert_eq!(queued(&h.store).await.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_same_user_is_admitted_once() {
    let h = harness().await;
    h.gate.publish(&voucher(7, 5)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let gate = h.gate.clone();
        handles.push(tokio::spawn(async move { gate.admit(7, 42).await }));
    }
    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Admission::Admitted { .. } => admitted += 1,
            Admission::Rejected(reason) => assert_eq!(reason, RejectReason::AlreadyPurchased),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(
        h.store.get("seckill:stock:7").await.unwrap().as_deref(),
        Some("4")
    );
}

#[tokio::test]
async fn test_rejection_reasons() {
    let h = harness().await;
    h.gate.publish(&voucher(7, 1)).await.unwrap();

    assert!(matches!(
        h.gate.admit(7, 1).await.unwrap(),
        Admission::Admitted { .. }
    ));
    assert_eq!(
        h.gate.admit(7, 1).await.unwrap(),
        Admission::Rejected(RejectReason::AlreadyPurchased)
    );
    assert_eq!(
        h.gate.admit(7, 2).await.unwrap(),
        Admission::Rejected(RejectReason::OutOfStock)
    );
}

#[tokio::test]
async fn test_unpublished_voucher_is_out_of_stock() {
    let h = harness().await;
    assert_eq!(
        h.gate.admit(99, 1).await.unwrap(),
        Admission::Rejected(RejectReason::OutOfStock)
    );
    assert!(queued(&h.store).await.is_empty());
}

#[tokio::test]
async fn test_queue_entry_carries_order() {
    let h = harness().await;
    h.gate.publish(&voucher(7, 3)).await.unwrap();

    let order_id = h.gate.admit(7, 1001).await.unwrap().order_id().unwrap();
    let entries = queued(&h.store).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].field("voucherId"), Some("7"));
    assert_eq!(entries[0].field("userId"), Some("1001"));
    assert_eq!(entries[0].field("orderId"), Some(order_id.to_string().as_str()));
}

#[tokio::test]
async fn test_admit_for_uses_caller_identity() {
    let h = harness().await;
    h.gate.publish(&voucher(7, 3)).await.unwrap();
    let user = UserContext {
        id: 5,
        nick_name: "bob".to_string(),
        icon: String::new(),
    };

    assert!(h.gate.admit_for(&user, 7).await.unwrap().order_id().is_some());
    assert_eq!(
        h.gate.admit(7, 5).await.unwrap(),
        Admission::Rejected(RejectReason::AlreadyPurchased)
    );
}

#[tokio::test]
async fn test_publish_persists_voucher_and_seeds_stock() {
    let h = harness().await;
    h.gate.publish(&voucher(7, 25)).await.unwrap();

    assert_eq!(h.backing.load_voucher(7).await.unwrap().map(|v| v.stock), Some(25));
    assert_eq!(
        h.store.get("seckill:stock:7").await.unwrap().as_deref(),
        Some("25")
    );
}

#[tokio::test]
async fn test_publish_rejects_bad_vouchers() {
    let store = Arc::new(MockSharedStore::new());
    let mut backing = MockBackingStore::new();
    backing.expect_save_voucher().never();
    let gate = gate_over(store, Arc::new(backing));

    assert!(matches!(
        gate.publish(&voucher(7, -1)).await,
        Err(Error::InvalidArgument(_))
    ));
    let mut inverted = voucher(7, 1);
    std::mem::swap(&mut inverted.begin_time, &mut inverted.end_time);
    assert!(matches!(
        gate.publish(&inverted).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_id_failure_consumes_no_stock() {
    let mut store = MockSharedStore::new();
    store
        .expect_incr()
        .returning(|_| Err(StoreError::Unavailable("down".into()).into()));
    store.expect_admit().never();
    let gate = gate_over(Arc::new(store), Arc::new(MockBackingStore::new()));

    assert!(matches!(
        gate.admit(7, 1).await,
        Err(Error::Store(StoreError::Unavailable(_)))
    ));
}

#[tokio::test]
async fn test_store_failure_is_a_hard_error() {
    let mut store = MockSharedStore::new();
    store.expect_incr().returning(|_| Ok(1));
    store
        .expect_admit()
        .times(1)
        .returning(|_| Err(StoreError::Unavailable("down".into()).into()));
    let gate = gate_over(Arc::new(store), Arc::new(MockBackingStore::new()));

    assert!(matches!(
        gate.admit(7, 1).await,
        Err(Error::Store(StoreError::Unavailable(_)))
    ));
}
