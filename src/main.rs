//! `flashsale` daemon.
//!
//! Opens the sled stores under `storage.db_root_dir` and runs the
//! fulfillment worker over the persisted order stream until SIGINT or
//! SIGTERM. Orders admitted by an earlier run are persisted on startup,
//! including entries that were delivered but never acknowledged before a
//! crash.
//!
//! sled locks its directory to one process. Admission traffic therefore
//! reaches the stores through a [`flashsale::FlashSale`] embedded in the
//! serving process; this binary is the standalone form of the same
//! assembly, used to drain the order backlog when nothing else holds the
//! directory.

use std::path::Path;

use flashsale::metrics;
use flashsale::Error;
use flashsale::FlashSaleBuilder;
use flashsale::FlashSaleConfig;
use flashsale::Result;
use flashsale::SharedStore;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let config = FlashSaleConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.storage.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let sale = FlashSaleBuilder::new(config).build().await?;
    let fulfillment = &sale.config().fulfillment;
    let backlog = sale
        .shared_store()
        .xpending_count(&fulfillment.stream, &fulfillment.group, &fulfillment.consumer)
        .await?;
    info!(
        "{} holds {backlog} unacknowledged orders from the previous run",
        fulfillment.consumer
    );
    let worker = sale.start_fulfillment(graceful_rx)?;

    info!("flash sale started. Waiting for shutdown signal...");
    if let Err(e) = graceful_shutdown(graceful_tx).await {
        error!("Failed to shutdown: {:?}", e);
    }

    worker.await?;
    debug!("final metrics:\n{}", metrics::gather_text());

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown server..");
    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::SignalSenderClosed(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

/// Routes `tracing` output to `<log_dir>/flashsale.log`, filtered by
/// `RUST_LOG`. The returned guard flushes the writer when dropped.
fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let log_file = tracing_appender::rolling::never(log_dir, "flashsale.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
