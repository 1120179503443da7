use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use super::builder::Components;
use crate::utils::async_task::spawn_task;
use crate::AdmissionGate;
use crate::BackingStore;
use crate::CacheClient;
use crate::Error;
use crate::FlashSaleConfig;
use crate::FulfillmentWorker;
use crate::IdGenerator;
use crate::Result;
use crate::SessionStore;
use crate::SharedStore;
use crate::ShopService;

/// The assembled purchase path: admission in front, one fulfillment worker
/// behind the order stream.
pub struct FlashSale {
    config: FlashSaleConfig,
    components: Components,
    fulfillment_started: AtomicBool,
}

impl std::fmt::Debug for FlashSale {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FlashSale")
            .field("config", &self.config)
            .field("fulfillment_started", &self.fulfillment_started)
            .finish()
    }
}

impl FlashSale {
    pub(super) fn new(
        config: FlashSaleConfig,
        components: Components,
    ) -> Self {
        Self {
            config,
            components,
            fulfillment_started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &FlashSaleConfig {
        &self.config
    }

    pub fn shared_store(&self) -> Arc<dyn SharedStore> {
        self.components.shared_store.clone()
    }

    pub fn backing_store(&self) -> Arc<dyn BackingStore> {
        self.components.backing_store.clone()
    }

    pub fn ids(&self) -> Arc<IdGenerator> {
        self.components.ids.clone()
    }

    pub fn cache(&self) -> Arc<CacheClient> {
        self.components.cache.clone()
    }

    pub fn gate(&self) -> Arc<AdmissionGate> {
        self.components.gate.clone()
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.components.sessions.clone()
    }

    pub fn shops(&self) -> Arc<ShopService> {
        self.components.shops.clone()
    }

    pub fn worker(&self) -> Arc<FulfillmentWorker> {
        self.components.worker.clone()
    }

    /// Spawns the fulfillment worker. The stream has a single consumer per
    /// process, so only the first call starts it.
    pub fn start_fulfillment(
        &self,
        shutdown: watch::Receiver<()>,
    ) -> Result<JoinHandle<()>> {
        if self
            .fulfillment_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::InvalidArgument(
                "fulfillment worker already started".to_string(),
            ));
        }

        let worker = self.worker();
        info!("starting fulfillment worker");
        Ok(spawn_task("fulfillment_worker", move || async move {
            worker.run(shutdown).await
        }))
    }
}
