use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use crate::constants::LOCK_KEY_PREFIX;
use crate::Result;
use crate::SharedStore;

/// A named lock held in the shared store.
///
/// Each successful [`try_lock`](Self::try_lock) stores a fresh owner token
/// under `lock:<name>`. [`unlock`](Self::unlock) deletes the key only while it
/// still holds that token, so a holder whose lease expired can never release
/// the lock of whoever acquired it next.
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
    key: String,
    token: Mutex<Option<String>>,
}

impl Debug for DistributedLock {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("held", &self.token.lock().is_some())
            .finish()
    }
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn SharedStore>,
        name: &str,
    ) -> Self {
        Self {
            store,
            key: format!("{LOCK_KEY_PREFIX}{name}"),
            token: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Token of the current acquisition, if any.
    pub fn owner_token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    /// Single acquisition attempt. `Ok(false)` means someone else holds the
    /// lock; retrying is up to the caller.
    pub async fn try_lock(
        &self,
        ttl: Duration,
    ) -> Result<bool> {
        let token = nanoid!();
        let acquired = self.store.set_nx(&self.key, &token, ttl).await?;
        if acquired {
            trace!("acquired {} for {:?}", self.key, ttl);
            *self.token.lock() = Some(token);
        } else {
            debug!("{} is held by another owner", self.key);
        }
        Ok(acquired)
    }

    /// Releases the lock if this handle still owns it. Returns whether a key
    /// was deleted; a lease that expired in the meantime is left alone.
    pub async fn unlock(&self) -> Result<bool> {
        let Some(token) = self.token.lock().take() else {
            return Ok(false);
        };
        let released = self.store.delete_if_equals(&self.key, &token).await?;
        if !released {
            warn!(
                "lease on {} expired before unlock; current holder left untouched",
                self.key
            );
        }
        Ok(released)
    }
}
