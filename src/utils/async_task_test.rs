use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::async_task::jitter;
use super::async_task::retry_until_some;
use super::async_task::spawn_task;
use crate::BackoffPolicy;
use crate::Error;

#[tokio::test(start_paused = true)]
async fn test_retry_until_some_success_after_misses() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let policy = BackoffPolicy {
        max_retries: 5,
        timeout_ms: 10_000,
        base_delay_ms: 10,
        max_delay_ms: 100,
    };

    let result = retry_until_some("lookup", policy, move || {
        let counter = counter_clone.clone();
        async move {
            let current = counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(if current < 2 { None } else { Some(current) })
        }
    })
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_some_stops_at_max_retries() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let policy = BackoffPolicy {
        max_retries: 3,
        timeout_ms: 60_000,
        base_delay_ms: 10,
        max_delay_ms: 100,
    };

    let result: Result<u32, Error> = retry_until_some("lookup", policy, move || {
        let counter = counter_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    })
    .await;

    assert!(matches!(result, Err(Error::RetryExhausted { attempts: 3, .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_until_some_stops_at_total_wait() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    // 100 + 200 fits, the next 400ms wait would exceed 500ms
    let policy = BackoffPolicy {
        max_retries: 0,
        timeout_ms: 500,
        base_delay_ms: 100,
        max_delay_ms: 10_000,
    };

    let result: Result<u32, Error> = retry_until_some("lookup", policy, move || {
        let counter = counter_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_until_some_propagates_errors() {
    let policy = BackoffPolicy::default();
    let result: Result<u32, Error> = retry_until_some("lookup", policy, || async {
        Err(Error::Fatal("boom".to_string()))
    })
    .await;

    assert!(matches!(result, Err(Error::Fatal(_))));
}

#[test]
fn test_jitter_stays_within_ten_percent() {
    for _ in 0..100 {
        let d = jitter(Duration::from_millis(100));
        assert!(d >= Duration::from_millis(100));
        assert!(d <= Duration::from_millis(110));
    }
    assert_eq!(jitter(Duration::from_millis(5)), Duration::from_millis(5));
}

#[tokio::test]
async fn test_spawn_task_runs_to_completion() {
    let counter = Arc::new(AtomicU32::new(0));
    let c = counter.clone();
    let handle = spawn_task("increment", move || async move {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    handle.await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let failing = spawn_task("failing", || async { Err(Error::Fatal("x".into())) });
    assert!(failing.await.is_ok());
}
