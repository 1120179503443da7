use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::metrics::CACHE_REBUILDS;
use crate::DistributedLock;
use crate::Result;

/// A background refresh of one key. The lock is released after `work`
/// finishes, fails or panics.
pub(crate) struct RebuildJob {
    pub(crate) key: String,
    pub(crate) lock: DistributedLock,
    pub(crate) work: BoxFuture<'static, Result<()>>,
}

impl RebuildJob {
    pub(crate) async fn run(self) {
        let RebuildJob { key, lock, work } = self;

        let outcome = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(())) => {
                debug!("rebuilt {key}");
                "refreshed"
            }
            Ok(Err(e)) => {
                error!("rebuild of {key} failed, stale value stays: {:?}", e);
                "failed"
            }
            Err(_) => {
                error!("rebuild of {key} panicked, stale value stays");
                "panicked"
            }
        };
        CACHE_REBUILDS.with_label_values(&[outcome]).inc();

        if let Err(e) = lock.unlock().await {
            warn!("failed to release rebuild lock {}: {:?}", lock.key(), e);
        }
    }
}

/// Fixed number of workers draining a bounded job queue.
pub(crate) struct RebuildPool {
    jobs: mpsc::Sender<RebuildJob>,
}

impl RebuildPool {
    /// Must be called inside a Tokio runtime. Workers exit once the pool is
    /// dropped and the queue is drained.
    pub(crate) fn spawn(
        size: usize,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..size {
            tokio::spawn(run_worker(worker, rx.clone()));
        }
        Self { jobs: tx }
    }

    /// Queues `job` without waiting. A full or closed queue hands it back.
    pub(crate) fn submit(
        &self,
        job: RebuildJob,
    ) -> std::result::Result<(), RebuildJob> {
        self.jobs.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Closed(job) => job,
        })
    }
}

async fn run_worker(
    worker: usize,
    jobs: Arc<Mutex<mpsc::Receiver<RebuildJob>>>,
) {
    loop {
        let next = jobs.lock().await.recv().await;
        match next {
            Some(job) => job.run().await,
            None => {
                debug!("rebuild worker {worker} exits");
                return;
            }
        }
    }
}
