use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Retries `task` until it yields `Some`, following `policy`.
///
/// Stops after `max_retries` attempts or once the accumulated waiting time would
/// exceed `timeout_ms`, whichever comes first.
pub(crate) async fn retry_until_some<F, Fut, T>(
    operation: &str,
    policy: BackoffPolicy,
    mut task: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let mut attempts = 0;
    let mut waited = Duration::ZERO;
    loop {
        if let Some(value) = task().await? {
            return Ok(value);
        }
        attempts += 1;

        let delay = jitter(policy.delay_for(attempts - 1));
        let out_of_attempts = policy.max_retries != 0 && attempts >= policy.max_retries;
        let out_of_time = waited + delay > policy.total_timeout();
        if out_of_attempts || out_of_time {
            warn!("{operation} gave up after {attempts} attempts ({waited:?} waited)");
            return Err(Error::RetryExhausted {
                operation: operation.to_string(),
                attempts,
            });
        }

        tokio::time::sleep(delay).await;
        waited += delay;
    }
}

/// Spreads concurrent retries apart by up to 10% of the delay.
pub(crate) fn jitter(delay: Duration) -> Duration {
    let spread = delay.as_millis() as u64 / 10;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Spawns a named background task and logs its failure.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
