use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref ADMISSION_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("admission_outcomes", "Admission attempts by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_lookups", "Cache lookups by strategy and outcome"),
        &["strategy", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref CACHE_REBUILDS: IntCounterVec = IntCounterVec::new(
        Opts::new("cache_rebuilds", "Background cache rebuilds by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref FULFILLMENT_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("fulfillment_outcomes", "Processed queue entries by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    for collector in [
        ADMISSION_OUTCOMES.clone(),
        CACHE_LOOKUPS.clone(),
        CACHE_REBUILDS.clone(),
        FULFILLMENT_OUTCOMES.clone(),
    ] {
        if let Err(e) = registry.register(Box::new(collector)) {
            error!("collector can not be registered: {:?}", e);
        }
    }
}

/// Registers the crate collectors with [`REGISTRY`] once per process.
pub fn init_metrics() {
    REGISTER.call_once(|| register_custom_metrics(&REGISTRY));
}

/// Text exposition of every collector in [`REGISTRY`].
pub fn gather_text() -> String {
    init_metrics();

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
