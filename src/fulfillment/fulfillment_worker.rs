use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::constants::FIELD_ORDER_ID;
use crate::constants::FIELD_USER_ID;
use crate::constants::FIELD_VOUCHER_ID;
use crate::metrics::FULFILLMENT_OUTCOMES;
use crate::BackingStore;
use crate::Clock;
use crate::DistributedLock;
use crate::Error;
use crate::FulfillmentConfig;
use crate::PlaceOutcome;
use crate::ReadFrom;
use crate::Result;
use crate::SharedStore;
use crate::StreamEntry;
use crate::VoucherOrder;

/// What happened to one queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Order row written, entry acknowledged
    Persisted,
    /// Order already existed, entry acknowledged
    Duplicate,
    /// Entry can never be fulfilled (no stock left, malformed); acknowledged
    Rejected,
    /// Per-user lock busy; entry stays pending
    Deferred,
}

impl Processed {
    fn label(&self) -> &'static str {
        match self {
            Processed::Persisted => "persisted",
            Processed::Duplicate => "duplicate",
            Processed::Rejected => "rejected",
            Processed::Deferred => "deferred",
        }
    }
}

/// Single consumer of the order stream within its consumer group.
pub struct FulfillmentWorker {
    store: Arc<dyn SharedStore>,
    backing: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
    config: FulfillmentConfig,
}

impl std::fmt::Debug for FulfillmentWorker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FulfillmentWorker")
            .field("config", &self.config)
            .finish()
    }
}

fn parse_field<T: std::str::FromStr>(
    entry: &StreamEntry,
    name: &str,
) -> Result<T> {
    entry
        .field(name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidArgument(format!("entry {} has no valid {name}", entry.id)))
}

/// `true` once shutdown was requested or its sender is gone.
fn shutdown_requested(shutdown: &watch::Receiver<()>) -> bool {
    shutdown.has_changed().unwrap_or(true)
}

impl FulfillmentWorker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        backing: Arc<dyn BackingStore>,
        clock: Arc<dyn Clock>,
        config: FulfillmentConfig,
    ) -> Self {
        Self {
            store,
            backing,
            clock,
            config,
        }
    }

    fn order_from(
        &self,
        entry: &StreamEntry,
    ) -> Result<VoucherOrder> {
        Ok(VoucherOrder {
            id: parse_field(entry, FIELD_ORDER_ID)?,
            user_id: parse_field(entry, FIELD_USER_ID)?,
            voucher_id: parse_field(entry, FIELD_VOUCHER_ID)?,
            create_time: self.clock.now(),
        })
    }

    /// Consumes new entries until `shutdown` fires.
    ///
    /// Starts with a recovery pass over this consumer's pending list. Any
    /// entry that is not acknowledged triggers another recovery pass.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!(
            "fulfillment worker {} joins {}/{}",
            self.config.consumer, self.config.stream, self.config.group
        );
        let recovered = self.recover(&mut shutdown).await?;
        if recovered > 0 {
            info!("recovered {recovered} pending orders at startup");
        }

        let mut read_failures = 0;
        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("fulfillment worker {} shutting down", self.config.consumer);
                    return Ok(());
                }
                read = self.store.xread_group(
                    &self.config.stream,
                    &self.config.group,
                    &self.config.consumer,
                    ReadFrom::New,
                    1,
                    Some(self.config.block()),
                ) => read,
            };

            let entries = match read {
                Ok(entries) => {
                    read_failures = 0;
                    entries
                }
                Err(e) => {
                    error!("reading {} failed: {:?}", self.config.stream, e);
                    read_failures += 1;
                    let delay = self.config.recovery_backoff.delay_for(read_failures - 1);
                    if self.pause(delay, &mut shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            for entry in entries {
                let acked = match self.process(&entry).await {
                    Ok(Processed::Deferred) => false,
                    Ok(_) => true,
                    Err(e) => {
                        error!("processing entry {} failed: {:?}", entry.id, e);
                        false
                    }
                };
                if !acked {
                    self.recover(&mut shutdown).await?;
                }
            }
        }
    }

    /// Replays this consumer's pending entries, oldest first, until none are
    /// left or shutdown is requested. Failed attempts are logged and retried
    /// after `recovery_backoff`. Returns how many entries were acknowledged.
    pub async fn recover(
        &self,
        shutdown: &mut watch::Receiver<()>,
    ) -> Result<usize> {
        let mut acknowledged = 0;
        let mut failures = 0;
        loop {
            if shutdown_requested(shutdown) {
                return Ok(acknowledged);
            }

            let attempt = match self
                .store
                .xread_group(
                    &self.config.stream,
                    &self.config.group,
                    &self.config.consumer,
                    ReadFrom::Pending,
                    1,
                    None,
                )
                .await
            {
                Ok(entries) => match entries.into_iter().next() {
                    None => return Ok(acknowledged),
                    Some(entry) => self.process(&entry).await,
                },
                Err(e) => Err(e),
            };

            match attempt {
                Ok(Processed::Deferred) => {
                    debug!("pending entry deferred, backing off");
                }
                Ok(_) => {
                    acknowledged += 1;
                    failures = 0;
                    continue;
                }
                Err(e) => {
                    error!("recovery attempt failed: {:?}", e);
                }
            }

            failures += 1;
            let delay = self.config.recovery_backoff.delay_for(failures - 1);
            if self.pause(delay, shutdown).await {
                return Ok(acknowledged);
            }
        }
    }

    /// Sleeps for `delay`. Returns `true` if shutdown interrupted it.
    async fn pause(
        &self,
        delay: Duration,
        shutdown: &mut watch::Receiver<()>,
    ) -> bool {
        tokio::select! {
            _ = shutdown.changed() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    /// Persists the order carried by `entry` under its user's lock and
    /// acknowledges the entry unless the outcome is [`Processed::Deferred`].
    ///
    /// Errors leave the entry pending.
    #[instrument(skip(self, entry), fields(id = %entry.id, delivery = entry.delivery_count))]
    pub async fn process(
        &self,
        entry: &StreamEntry,
    ) -> Result<Processed> {
        if entry.delivery_count > 1 {
            warn!(
                "entry {} redelivered, attempt {}",
                entry.id, entry.delivery_count
            );
        }
        let processed = match self.order_from(entry) {
            Ok(order) => match self.persist_locked(&order).await? {
                None => Processed::Deferred,
                Some(PlaceOutcome::Placed) => Processed::Persisted,
                Some(PlaceOutcome::Duplicate) => {
                    debug!("order {} was already persisted", order.id);
                    Processed::Duplicate
                }
                Some(PlaceOutcome::OutOfStock) => {
                    error!(
                        "voucher {} has no stock left for admitted order {}",
                        order.voucher_id, order.id
                    );
                    Processed::Rejected
                }
            },
            Err(e) => {
                error!("dropping malformed entry {}: {}", entry.id, e);
                Processed::Rejected
            }
        };

        if processed != Processed::Deferred {
            self.store
                .xack(&self.config.stream, &self.config.group, &[entry.id])
                .await?;
        }
        FULFILLMENT_OUTCOMES
            .with_label_values(&[processed.label()])
            .inc();
        Ok(processed)
    }

    /// `None` when the user's lock is held elsewhere.
    async fn persist_locked(
        &self,
        order: &VoucherOrder,
    ) -> Result<Option<PlaceOutcome>> {
        let lock = DistributedLock::new(
            self.store.clone(),
            &format!("{}{}", self.config.user_lock_prefix, order.user_id),
        );
        if !lock.try_lock(self.config.user_lock_ttl()).await? {
            warn!(
                "user {} is being fulfilled elsewhere, deferring order {}",
                order.user_id, order.id
            );
            return Ok(None);
        }

        let outcome = self.persist(order).await;
        if let Err(e) = lock.unlock().await {
            warn!("failed to release {}: {:?}", lock.key(), e);
        }
        outcome.map(Some)
    }

    async fn persist(
        &self,
        order: &VoucherOrder,
    ) -> Result<PlaceOutcome> {
        if self
            .backing
            .count_orders(order.user_id, order.voucher_id)
            .await?
            > 0
        {
            return Ok(PlaceOutcome::Duplicate);
        }
        self.backing.place_order(order).await
    }
}
