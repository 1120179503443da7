use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::RebuildJob;
use super::RebuildPool;
use crate::metrics::CACHE_LOOKUPS;
use crate::utils::async_task::retry_until_some;
use crate::CacheConfig;
use crate::Clock;
use crate::DistributedLock;
use crate::Error;
use crate::Result;
use crate::SharedStore;

/// Cached marker for "the backing store has no such row".
pub const NULL_SENTINEL: &str = "";

/// Payload envelope of logically expiring entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalEntry<T> {
    pub data: T,
    pub logical_expiry: DateTime<Utc>,
}

fn record_lookup(
    strategy: &str,
    outcome: &str,
) {
    CACHE_LOOKUPS.with_label_values(&[strategy, outcome]).inc();
}

/// Serializes `value` wrapped with an expiry `window` from now.
fn logical_payload<T: Serialize>(
    clock: &dyn Clock,
    value: &T,
    window: Duration,
) -> Result<String> {
    let window = chrono::Duration::from_std(window)
        .map_err(|e| Error::InvalidArgument(format!("logical expiry window: {e}")))?;
    let entry = LogicalEntry {
        data: value,
        logical_expiry: clock.now() + window,
    };
    Ok(serde_json::to_string(&entry)?)
}

/// Read-through cache over a [`SharedStore`].
///
/// Values are JSON encoded. Every strategy takes a key prefix and an id; the
/// cache key is their concatenation, and the rebuild lock of a key is named
/// after the key itself.
pub struct CacheClient {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    rebuilds: RebuildPool,
}

impl std::fmt::Debug for CacheClient {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("config", &self.config)
            .finish()
    }
}

impl CacheClient {
    /// Starts the rebuild workers, so it must run inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn SharedStore>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Self {
        let rebuilds = RebuildPool::spawn(config.rebuild_pool_size, config.rebuild_queue_capacity);
        Self {
            store,
            clock,
            config,
            rebuilds,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.store.set(key, &json, Some(ttl)).await
    }

    /// Writes `value` without physical expiry, stamped to go stale after
    /// `window`.
    pub async fn set_with_logical_expire<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        window: Duration,
    ) -> Result<()> {
        let json = logical_payload(self.clock.as_ref(), value, window)?;
        self.store.set(key, &json, None).await
    }

    pub async fn invalidate(
        &self,
        key_prefix: &str,
        id: impl Display,
    ) -> Result<bool> {
        self.store.delete(&format!("{key_prefix}{id}")).await
    }

    /// `None` on a miss, `Some(None)` on the null sentinel.
    async fn cached<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<Option<T>>> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(json) if json == NULL_SENTINEL => Ok(Some(None)),
            Some(json) => Ok(Some(Some(serde_json::from_str(&json)?))),
        }
    }

    /// Loads from the backing store and caches the answer, sentinel included.
    async fn load_and_cache<T, ID, F, Fut>(
        &self,
        key: &str,
        id: ID,
        loader: F,
        ttl: Duration,
        null_ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        match loader(id).await? {
            Some(value) => {
                self.set(key, &value, ttl).await?;
                Ok(Some(value))
            }
            None => {
                self.store.set(key, NULL_SENTINEL, Some(null_ttl)).await?;
                Ok(None)
            }
        }
    }

    /// Cache-aside read that also caches misses.
    ///
    /// A cached sentinel answers `None` without calling `loader`. On a true
    /// miss `loader` runs; `None` is cached as the sentinel for `null_ttl`,
    /// a value is cached for `ttl`.
    #[instrument(skip(self, loader))]
    pub async fn query_with_pass_through<T, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
        null_ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        ID: Display + std::fmt::Debug,
        F: FnOnce(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = format!("{key_prefix}{id}");
        match self.cached(&key).await? {
            Some(Some(value)) => {
                record_lookup("pass_through", "hit");
                return Ok(Some(value));
            }
            Some(None) => {
                record_lookup("pass_through", "null_hit");
                return Ok(None);
            }
            None => record_lookup("pass_through", "miss"),
        }

        self.load_and_cache(&key, id, loader, ttl, null_ttl).await
    }

    /// Stale-while-revalidate read for pre-warmed keys.
    ///
    /// A missing key answers `None`; this strategy never populates cold keys.
    /// A logically expired value is returned as is, and whoever wins the
    /// key's rebuild lock queues one background refresh with a new `window`.
    #[instrument(skip(self, loader))]
    pub async fn query_with_logical_expire<T, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        loader: F,
        window: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        ID: Display + std::fmt::Debug + Send + 'static,
        F: FnOnce(ID) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
    {
        let key = format!("{key_prefix}{id}");
        let Some(entry) = self.logical_entry::<T>(&key).await? else {
            record_lookup("logical_expire", "miss");
            return Ok(None);
        };
        if entry.logical_expiry > self.clock.now() {
            record_lookup("logical_expire", "fresh");
            return Ok(Some(entry.data));
        }
        record_lookup("logical_expire", "stale");

        let lock = DistributedLock::new(self.store.clone(), &key);
        if !lock.try_lock(self.config.rebuild_lock_ttl()).await? {
            debug!("rebuild of {key} already in progress");
            return Ok(Some(entry.data));
        }

        // another caller may have finished a rebuild between our read and lock
        let latest = match self.logical_entry::<T>(&key).await {
            Ok(latest) => latest,
            Err(e) => {
                if let Err(unlock_err) = lock.unlock().await {
                    warn!("failed to release {}: {:?}", lock.key(), unlock_err);
                }
                return Err(e);
            }
        };
        if let Some(latest) = latest {
            if latest.logical_expiry > self.clock.now() {
                lock.unlock().await?;
                return Ok(Some(latest.data));
            }
        }

        let work = {
            let store = self.store.clone();
            let clock = self.clock.clone();
            let key = key.clone();
            async move {
                match loader(id).await? {
                    Some(value) => {
                        let json = logical_payload(clock.as_ref(), &value, window)?;
                        store.set(&key, &json, None).await
                    }
                    None => {
                        warn!("{key} no longer exists in the backing store, dropping it");
                        store.delete(&key).await.map(|_| ())
                    }
                }
            }
            .boxed()
        };

        if let Err(job) = self.rebuilds.submit(RebuildJob { key, lock, work }) {
            warn!("rebuild queue is full, {} stays stale", job.key);
            job.lock.unlock().await?;
        }
        Ok(Some(entry.data))
    }

    async fn logical_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<LogicalEntry<T>>> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(json) if json == NULL_SENTINEL => Ok(None),
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        }
    }

    /// Blocking cache-aside read guarded by the key's lock.
    ///
    /// On a miss only the lock holder loads; the others back off per
    /// `cache.mutex_retry` and re-read, failing with
    /// [`Error::RetryExhausted`] once the policy runs out.
    #[instrument(skip(self, loader))]
    pub async fn query_with_mutex<T, ID, F, Fut>(
        &self,
        key_prefix: &str,
        id: ID,
        loader: F,
        ttl: Duration,
        null_ttl: Duration,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        ID: Display + std::fmt::Debug + Clone,
        F: Fn(ID) -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let key = format!("{key_prefix}{id}");
        let (key, id, loader) = (&key, &id, &loader);

        retry_until_some("query_with_mutex", self.config.mutex_retry, move || async move {
            if let Some(cached) = self.cached::<T>(key).await? {
                record_lookup("mutex", "hit");
                return Ok(Some(cached));
            }

            let lock = DistributedLock::new(self.store.clone(), key);
            if !lock.try_lock(self.config.rebuild_lock_ttl()).await? {
                return Ok(None);
            }
            record_lookup("mutex", "miss");

            let loaded = AssertUnwindSafe(async {
                // the previous holder may have filled it already
                match self.cached::<T>(key).await? {
                    Some(cached) => Ok(cached),
                    None => {
                        self.load_and_cache(key, id.clone(), loader, ttl, null_ttl)
                            .await
                    }
                }
            })
            .catch_unwind()
            .await;

            if let Err(e) = lock.unlock().await {
                warn!("failed to release {}: {:?}", lock.key(), e);
            }

            match loaded {
                Ok(result) => result.map(Some),
                Err(_) => Err(Error::Loader {
                    key: key.clone(),
                    reason: "loader panicked".to_string(),
                }),
            }
        })
        .await
    }
}
