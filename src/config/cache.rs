use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::constants::CACHE_SHOP_KEY;
use crate::Error;
use crate::Result;

/// Cache-aside read strategy parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Key prefix for cached shops
    #[serde(default = "default_shop_key_prefix")]
    pub shop_key_prefix: String,

    /// Physical TTL of a regular cached value (seconds)
    #[serde(default = "default_shop_ttl_secs")]
    pub shop_ttl_secs: u64,

    /// Physical TTL of the "not found" sentinel (seconds)
    #[serde(default = "default_null_ttl_secs")]
    pub null_ttl_secs: u64,

    /// Logical expiry window written by warm-up and rebuilds (seconds)
    #[serde(default = "default_logical_expire_secs")]
    pub logical_expire_secs: u64,

    /// TTL of the mutex held while a rebuild runs (seconds)
    #[serde(default = "default_rebuild_lock_ttl_secs")]
    pub rebuild_lock_ttl_secs: u64,

    /// Number of rebuild workers
    #[serde(default = "default_rebuild_pool_size")]
    pub rebuild_pool_size: usize,

    /// Rebuild jobs waiting for a worker before new ones are turned away
    #[serde(default = "default_rebuild_queue_capacity")]
    pub rebuild_queue_capacity: usize,

    /// Bounded retry policy of the blocking mutex strategy
    #[serde(default = "default_mutex_retry")]
    pub mutex_retry: BackoffPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shop_key_prefix: default_shop_key_prefix(),
            shop_ttl_secs: default_shop_ttl_secs(),
            null_ttl_secs: default_null_ttl_secs(),
            logical_expire_secs: default_logical_expire_secs(),
            rebuild_lock_ttl_secs: default_rebuild_lock_ttl_secs(),
            rebuild_pool_size: default_rebuild_pool_size(),
            rebuild_queue_capacity: default_rebuild_queue_capacity(),
            mutex_retry: default_mutex_retry(),
        }
    }
}

impl CacheConfig {
    pub fn shop_ttl(&self) -> Duration {
        Duration::from_secs(self.shop_ttl_secs)
    }

    pub fn null_ttl(&self) -> Duration {
        Duration::from_secs(self.null_ttl_secs)
    }

    pub fn logical_expire(&self) -> Duration {
        Duration::from_secs(self.logical_expire_secs)
    }

    pub fn rebuild_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.rebuild_lock_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.shop_key_prefix.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "cache.shop_key_prefix cannot be empty".into(),
            )));
        }
        if self.null_ttl_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "null_ttl_secs must be greater than 0".into(),
            )));
        }
        if self.null_ttl_secs > self.shop_ttl_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "null_ttl_secs ({}) must not exceed shop_ttl_secs ({})",
                self.null_ttl_secs, self.shop_ttl_secs
            ))));
        }
        if self.rebuild_lock_ttl_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "rebuild_lock_ttl_secs must be greater than 0".into(),
            )));
        }
        if self.rebuild_pool_size == 0 || self.rebuild_queue_capacity == 0 {
            return Err(Error::Config(ConfigError::Message(
                "rebuild pool size and queue capacity must be greater than 0".into(),
            )));
        }
        self.mutex_retry.validate("cache.mutex_retry")?;
        Ok(())
    }
}

fn default_shop_key_prefix() -> String {
    CACHE_SHOP_KEY.to_string()
}
fn default_shop_ttl_secs() -> u64 {
    30 * 60
}
fn default_null_ttl_secs() -> u64 {
    2 * 60
}
fn default_logical_expire_secs() -> u64 {
    20
}
fn default_rebuild_lock_ttl_secs() -> u64 {
    10
}
fn default_rebuild_pool_size() -> usize {
    10
}
fn default_rebuild_queue_capacity() -> usize {
    1024
}
fn default_mutex_retry() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 20,
        timeout_ms: 2000,
        base_delay_ms: 50,
        max_delay_ms: 200,
    }
}
