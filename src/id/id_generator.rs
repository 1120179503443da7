use std::sync::Arc;

use tracing::trace;

use crate::constants::COUNT_BITS;
use crate::utils::time::day_key;
use crate::Clock;
use crate::Error;
use crate::IdConfig;
use crate::Result;
use crate::SharedStore;

/// Composite id generator.
///
/// `id = (now_secs - epoch) << 32 | counter`, where `counter` is an atomic
/// per-day increment of `<counter_prefix><sequence>:<yyyy:MM:dd>` in the
/// shared store. Ids for one sequence grow with time and the atomic counter
/// keeps them unique within the same second.
pub struct IdGenerator {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    config: IdConfig,
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("config", &self.config)
            .finish()
    }
}

impl IdGenerator {
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        config: IdConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub async fn next_id(
        &self,
        sequence: &str,
    ) -> Result<i64> {
        let now = self.clock.now();
        let elapsed = now.timestamp() - self.config.epoch_secs;
        if elapsed < 0 {
            return Err(Error::InvalidArgument(format!(
                "clock reads {now} which is before the id epoch"
            )));
        }

        let key = format!(
            "{}{}:{}",
            self.config.counter_prefix,
            sequence,
            day_key(&now)
        );
        let count = self.store.incr(&key).await?;
        if count >> COUNT_BITS != 0 {
            return Err(Error::Fatal(format!(
                "daily counter {key} overflowed {COUNT_BITS} bits"
            )));
        }

        let id = elapsed << COUNT_BITS | count;
        trace!("next_id({sequence}) = {id}");
        Ok(id)
    }
}

/// Splits an id back into `(seconds since epoch, counter)`.
pub fn decompose(id: i64) -> (i64, i64) {
    (id >> COUNT_BITS, id & ((1i64 << COUNT_BITS) - 1))
}
