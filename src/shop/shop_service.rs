use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::BackingStore;
use crate::CacheClient;
use crate::Error;
use crate::Result;
use crate::Shop;

pub struct ShopService {
    cache: Arc<CacheClient>,
    backing: Arc<dyn BackingStore>,
}

impl std::fmt::Debug for ShopService {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ShopService").finish()
    }
}

impl ShopService {
    pub fn new(
        cache: Arc<CacheClient>,
        backing: Arc<dyn BackingStore>,
    ) -> Self {
        Self { cache, backing }
    }

    fn key_prefix(&self) -> &str {
        &self.cache.config().shop_key_prefix
    }

    fn loader(&self) -> impl Fn(u64) -> futures::future::BoxFuture<'static, Result<Option<Shop>>> {
        let backing = self.backing.clone();
        move |id| {
            let backing = backing.clone();
            Box::pin(async move { backing.load_shop(id).await })
        }
    }

    /// Regular lookup; unknown ids are cached as misses.
    pub async fn query_by_id(
        &self,
        id: u64,
    ) -> Result<Option<Shop>> {
        let config = self.cache.config();
        self.cache
            .query_with_pass_through(
                self.key_prefix(),
                id,
                self.loader(),
                config.shop_ttl(),
                config.null_ttl(),
            )
            .await
    }

    /// Lookup for hot shops that were [`warm_up`](Self::warm_up)ed.
    pub async fn query_hot(
        &self,
        id: u64,
    ) -> Result<Option<Shop>> {
        self.cache
            .query_with_logical_expire(
                self.key_prefix(),
                id,
                self.loader(),
                self.cache.config().logical_expire(),
            )
            .await
    }

    /// Lookup where concurrent misses wait for a single loader.
    pub async fn query_exclusive(
        &self,
        id: u64,
    ) -> Result<Option<Shop>> {
        let config = self.cache.config();
        self.cache
            .query_with_mutex(
                self.key_prefix(),
                id,
                self.loader(),
                config.shop_ttl(),
                config.null_ttl(),
            )
            .await
    }

    /// Loads a shop into the logical-expiry cache. Returns false when the
    /// shop does not exist.
    pub async fn warm_up(
        &self,
        id: u64,
        window: Duration,
    ) -> Result<bool> {
        let Some(shop) = self.backing.load_shop(id).await? else {
            return Ok(false);
        };
        let key = format!("{}{}", self.key_prefix(), id);
        self.cache.set_with_logical_expire(&key, &shop, window).await?;
        debug!("warmed up {key}");
        Ok(true)
    }

    /// Writes the backing store first, then drops the cached copy. Returns
    /// false when no such shop exists.
    pub async fn update(
        &self,
        shop: &Shop,
    ) -> Result<bool> {
        let Some(id) = shop.id else {
            return Err(Error::InvalidArgument("shop id cannot be empty".to_string()));
        };
        if !self.backing.update_shop(shop).await? {
            return Ok(false);
        }
        self.cache.invalidate(self.key_prefix(), id).await?;
        Ok(true)
    }
}
