use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use super::BackoffPolicy;
use crate::constants::BEGIN_TIMESTAMP;
use crate::constants::ID_COUNTER_KEY_PREFIX;
use crate::constants::LOCK_ORDER_NAME;
use crate::constants::LOGIN_USER_KEY;
use crate::constants::ORDER_CONSUMER;
use crate::constants::ORDER_GROUP;
use crate::constants::ORDER_SEQUENCE;
use crate::constants::ORDER_STREAM;
use crate::constants::SECKILL_ORDER_KEY;
use crate::constants::SECKILL_STOCK_KEY;
use crate::Error;
use crate::Result;

/// Composite id generator settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdConfig {
    /// Fixed epoch (unix seconds) subtracted from the current time
    #[serde(default = "default_epoch_secs")]
    pub epoch_secs: i64,

    /// Key prefix of the per-day counters
    #[serde(default = "default_counter_prefix")]
    pub counter_prefix: String,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            epoch_secs: default_epoch_secs(),
            counter_prefix: default_counter_prefix(),
        }
    }
}

impl IdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epoch_secs < 0 {
            return Err(Error::Config(ConfigError::Message(
                "id.epoch_secs cannot be negative".into(),
            )));
        }
        Ok(())
    }
}

/// Admission gate settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "default_stock_prefix")]
    pub stock_key_prefix: String,

    #[serde(default = "default_order_prefix")]
    pub order_key_prefix: String,

    /// Business sequence used for order ids
    #[serde(default = "default_order_sequence")]
    pub order_sequence: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            stock_key_prefix: default_stock_prefix(),
            order_key_prefix: default_order_prefix(),
            order_sequence: default_order_sequence(),
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stock_key_prefix == self.order_key_prefix {
            return Err(Error::Config(ConfigError::Message(
                "stock and purchase marker prefixes must differ".into(),
            )));
        }
        if self.order_sequence.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "admission.order_sequence cannot be empty".into(),
            )));
        }
        Ok(())
    }
}

/// Fulfillment consumer settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FulfillmentConfig {
    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default = "default_consumer")]
    pub consumer: String,

    /// How long one read waits for new entries (milliseconds)
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Per-user lock name prefix
    #[serde(default = "default_user_lock_prefix")]
    pub user_lock_prefix: String,

    /// TTL of the per-user lock (seconds)
    #[serde(default = "default_user_lock_ttl_secs")]
    pub user_lock_ttl_secs: u64,

    /// Pause between failed recovery attempts
    #[serde(default = "default_recovery_backoff")]
    pub recovery_backoff: BackoffPolicy,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            stream: default_stream(),
            group: default_group(),
            consumer: default_consumer(),
            block_ms: default_block_ms(),
            user_lock_prefix: default_user_lock_prefix(),
            user_lock_ttl_secs: default_user_lock_ttl_secs(),
            recovery_backoff: default_recovery_backoff(),
        }
    }
}

impl FulfillmentConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn user_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.user_lock_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.is_empty() || self.group.is_empty() || self.consumer.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "fulfillment stream, group and consumer names cannot be empty".into(),
            )));
        }
        if self.block_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "fulfillment.block_ms must be greater than 0".into(),
            )));
        }
        if self.user_lock_ttl_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "fulfillment.user_lock_ttl_secs must be greater than 0".into(),
            )));
        }
        self.recovery_backoff.validate("fulfillment.recovery_backoff")?;
        Ok(())
    }
}

/// Login session settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_token_prefix")]
    pub token_key_prefix: String,

    /// Idle timeout; refreshed on every resolved request (seconds)
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_key_prefix: default_token_prefix(),
            ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "session.ttl_secs must be greater than 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_epoch_secs() -> i64 {
    BEGIN_TIMESTAMP
}
fn default_counter_prefix() -> String {
    ID_COUNTER_KEY_PREFIX.to_string()
}
fn default_stock_prefix() -> String {
    SECKILL_STOCK_KEY.to_string()
}
fn default_order_prefix() -> String {
    SECKILL_ORDER_KEY.to_string()
}
fn default_order_sequence() -> String {
    ORDER_SEQUENCE.to_string()
}
fn default_stream() -> String {
    ORDER_STREAM.to_string()
}
fn default_group() -> String {
    ORDER_GROUP.to_string()
}
fn default_consumer() -> String {
    ORDER_CONSUMER.to_string()
}
fn default_block_ms() -> u64 {
    2000
}
fn default_user_lock_prefix() -> String {
    LOCK_ORDER_NAME.to_string()
}
fn default_user_lock_ttl_secs() -> u64 {
    10
}
fn default_recovery_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 0,
        base_delay_ms: 20,
        max_delay_ms: 2000,
    }
}
fn default_token_prefix() -> String {
    LOGIN_USER_KEY.to_string()
}
fn default_session_ttl_secs() -> u64 {
    30 * 60
}
