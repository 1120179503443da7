//! A builder for assembling a [`FlashSale`] instance.
//!
//! [`FlashSaleBuilder`] wires the stores, the clock and every component of
//! the purchase path from one validated [`FlashSaleConfig`].
//!
//! ## Defaults
//! - Shared store: [`SledSharedStore`] under `storage.db_root_dir`
//! - Backing store: [`SledBackingStore`] under `storage.db_root_dir`
//! - Clock: [`SystemClock`]
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let sale = FlashSaleBuilder::new(FlashSaleConfig::new()?.validate()?)
//!     .shared_store(Arc::new(MemorySharedStore::new())) // Optional override
//!     .build()
//!     .await?;
//! sale.start_fulfillment(shutdown_rx)?;
//! ```

use std::sync::Arc;

use tracing::debug;
use tracing::info;

use crate::metrics;
use crate::AdmissionGate;
use crate::BackingStore;
use crate::CacheClient;
use crate::Clock;
use crate::FlashSale;
use crate::FlashSaleConfig;
use crate::FulfillmentWorker;
use crate::IdGenerator;
use crate::Result;
use crate::SessionStore;
use crate::SharedStore;
use crate::ShopService;
use crate::SledBackingStore;
use crate::SledSharedStore;
use crate::SystemClock;

pub struct FlashSaleBuilder {
    pub(super) config: FlashSaleConfig,
    pub(super) shared_store: Option<Arc<dyn SharedStore>>,
    pub(super) backing_store: Option<Arc<dyn BackingStore>>,
    pub(super) clock: Option<Arc<dyn Clock>>,
}

impl FlashSaleBuilder {
    /// `config` is expected to be validated already.
    pub fn new(config: FlashSaleConfig) -> Self {
        Self {
            config,
            shared_store: None,
            backing_store: None,
            clock: None,
        }
    }

    /// Sets a custom shared key/value store
    pub fn shared_store(
        mut self,
        shared_store: Arc<dyn SharedStore>,
    ) -> Self {
        self.shared_store = Some(shared_store);
        self
    }

    /// Sets a custom backing store
    pub fn backing_store(
        mut self,
        backing_store: Arc<dyn BackingStore>,
    ) -> Self {
        self.backing_store = Some(backing_store);
        self
    }

    /// Sets a custom time source
    pub fn clock(
        mut self,
        clock: Arc<dyn Clock>,
    ) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Assembles every component and creates the order stream's consumer
    /// group. Must run inside a Tokio runtime since the cache client starts
    /// its rebuild workers here.
    pub async fn build(self) -> Result<FlashSale> {
        let config = self.config;

        let shared_store = match self.shared_store {
            Some(shared_store) => shared_store,
            None => {
                debug!(
                    "opening sled shared store under {:?}",
                    config.storage.db_root_dir
                );
                Arc::new(SledSharedStore::open(&config.storage.db_root_dir)?)
            }
        };
        let backing_store = match self.backing_store {
            Some(backing_store) => backing_store,
            None => {
                debug!(
                    "opening sled backing store under {:?}",
                    config.storage.db_root_dir
                );
                Arc::new(SledBackingStore::open(&config.storage.db_root_dir)?)
            }
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        metrics::init_metrics();

        let ids = Arc::new(IdGenerator::new(
            shared_store.clone(),
            clock.clone(),
            config.id.clone(),
        ));
        let cache = Arc::new(CacheClient::new(
            shared_store.clone(),
            clock.clone(),
            config.cache.clone(),
        ));
        let gate = Arc::new(AdmissionGate::new(
            shared_store.clone(),
            backing_store.clone(),
            ids.clone(),
            config.admission.clone(),
            config.fulfillment.stream.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(
            shared_store.clone(),
            config.session.clone(),
        ));
        let shops = Arc::new(ShopService::new(cache.clone(), backing_store.clone()));
        let worker = Arc::new(FulfillmentWorker::new(
            shared_store.clone(),
            backing_store.clone(),
            clock,
            config.fulfillment.clone(),
        ));

        shared_store
            .xgroup_create(&config.fulfillment.stream, &config.fulfillment.group)
            .await?;
        info!(
            "flash sale ready, orders flow through {}/{}",
            config.fulfillment.stream, config.fulfillment.group
        );

        Ok(FlashSale::new(
            config,
            Components {
                shared_store,
                backing_store,
                ids,
                cache,
                gate,
                sessions,
                shops,
                worker,
            },
        ))
    }
}

/// Everything [`FlashSaleBuilder::build`] wires together.
pub(super) struct Components {
    pub(super) shared_store: Arc<dyn SharedStore>,
    pub(super) backing_store: Arc<dyn BackingStore>,
    pub(super) ids: Arc<IdGenerator>,
    pub(super) cache: Arc<CacheClient>,
    pub(super) gate: Arc<AdmissionGate>,
    pub(super) sessions: Arc<SessionStore>,
    pub(super) shops: Arc<ShopService>,
    pub(super) worker: Arc<FulfillmentWorker>,
}
