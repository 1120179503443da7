use std::collections::HashMap;
use std::sync::Arc;

use nanoid::nanoid;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::Result;
use crate::SessionConfig;
use crate::SharedStore;

const FIELD_ID: &str = "id";
const FIELD_NICK_NAME: &str = "nickName";
const FIELD_ICON: &str = "icon";

/// Identity of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: u64,
    pub nick_name: String,
    pub icon: String,
}

impl UserContext {
    fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            (FIELD_ID.to_string(), self.id.to_string()),
            (FIELD_NICK_NAME.to_string(), self.nick_name.clone()),
            (FIELD_ICON.to_string(), self.icon.clone()),
        ])
    }

    fn from_fields(mut fields: HashMap<String, String>) -> Option<Self> {
        let id = fields.get(FIELD_ID)?.parse().ok()?;
        Some(Self {
            id,
            nick_name: fields.remove(FIELD_NICK_NAME).unwrap_or_default(),
            icon: fields.remove(FIELD_ICON).unwrap_or_default(),
        })
    }
}

/// Token to user mapping with a sliding idle timeout.
pub struct SessionStore {
    store: Arc<dyn SharedStore>,
    config: SessionConfig,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("config", &self.config)
            .finish()
    }
}

impl SessionStore {
    pub fn new(
        store: Arc<dyn SharedStore>,
        config: SessionConfig,
    ) -> Self {
        Self { store, config }
    }

    fn key(
        &self,
        token: &str,
    ) -> String {
        format!("{}{}", self.config.token_key_prefix, token)
    }

    /// Opens a session for `user` and returns its token.
    pub async fn save(
        &self,
        user: &UserContext,
    ) -> Result<String> {
        let token = nanoid!(32);
        self.store
            .hset_all(&self.key(&token), user.to_fields(), Some(self.config.ttl()))
            .await?;
        debug!("opened session for user {}", user.id);
        Ok(token)
    }

    /// Resolves `token` and pushes its expiry out by the idle timeout.
    ///
    /// Blank, unknown, expired and malformed sessions all resolve to `None`.
    pub async fn resolve(
        &self,
        token: &str,
    ) -> Result<Option<UserContext>> {
        if token.trim().is_empty() {
            return Ok(None);
        }
        let key = self.key(token);
        let fields = self.store.hget_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let Some(user) = UserContext::from_fields(fields) else {
            warn!("session {key} is malformed, ignoring it");
            return Ok(None);
        };
        self.store.expire(&key, self.config.ttl()).await?;
        Ok(Some(user))
    }

    pub async fn remove(
        &self,
        token: &str,
    ) -> Result<bool> {
        self.store.delete(&self.key(token)).await
    }
}
