//! Inbound client messages and their router.
//!
//! Messages arrive as `{type, data}` envelopes. Parsing yields a closed
//! [`ClientMessage`]; [`plan`] turns it into a list of [`Effect`]s without
//! touching any state, and [`MessageRouter::dispatch`] performs them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheStoreSet, SharedStoreSet, StoreError};
use crate::domain::types::{LifecycleState, ResourceClass, Strategy};

use super::lifecycle::{LifecycleError, LifecycleManager};
use super::notify::{Notifier, ServerEvent};
use super::strategy::StrategyExecutor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SkipWait,
    CacheRefreshForUrl { url: String },
    ClearAllCaches,
    StatusQuery,
}

/// Wire form of an inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("message `{kind}` is missing `data.{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("url `{0}` is outside the upstream origin")]
    ForeignOrigin(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl TryFrom<RawMessage> for ClientMessage {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            "skip-wait" => Ok(ClientMessage::SkipWait),
            "cache-refresh-for-url" => {
                let url = raw
                    .data
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or(MessageError::MissingField {
                        kind: "cache-refresh-for-url",
                        field: "url",
                    })?;
                Ok(ClientMessage::CacheRefreshForUrl {
                    url: url.to_string(),
                })
            }
            "clear-all-caches" => Ok(ClientMessage::ClearAllCaches),
            "status-query" => Ok(ClientMessage::StatusQuery),
            _ => Err(MessageError::UnknownType(raw.kind)),
        }
    }
}

/// Side effect requested by a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    SkipWaiting,
    Refresh(Url),
    DeleteAllStores,
    Broadcast(ServerEvent),
    ReplyStatus,
}

/// Map a message to the effects that carry it out.
///
/// Refresh targets are resolved against `origin` and must stay on it.
pub fn plan(message: &ClientMessage, origin: &Url) -> Result<Vec<Effect>, MessageError> {
    let effects = match message {
        ClientMessage::SkipWait => vec![Effect::SkipWaiting],
        ClientMessage::CacheRefreshForUrl { url } => {
            let resolved = origin.join(url).map_err(|err| MessageError::InvalidUrl {
                url: url.clone(),
                reason: err.to_string(),
            })?;
            if resolved.origin() != origin.origin() {
                return Err(MessageError::ForeignOrigin(url.clone()));
            }
            vec![Effect::Refresh(resolved)]
        }
        ClientMessage::ClearAllCaches => vec![
            Effect::DeleteAllStores,
            Effect::Broadcast(ServerEvent::CacheCleared {}),
        ],
        ClientMessage::StatusQuery => vec![Effect::ReplyStatus],
    };
    Ok(effects)
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub version: String,
    pub state: LifecycleState,
    /// Entry count per store, across all versions present.
    pub caches: BTreeMap<String, usize>,
    pub strategies: BTreeMap<ResourceClass, Strategy>,
}

#[derive(Debug)]
pub enum Reply {
    Accepted,
    Status(StatusReport),
}

pub struct MessageRouter {
    stores: SharedStoreSet,
    lifecycle: Arc<LifecycleManager>,
    strategy: Arc<StrategyExecutor>,
    notifier: Notifier,
}

impl MessageRouter {
    pub fn new(
        stores: SharedStoreSet,
        lifecycle: Arc<LifecycleManager>,
        strategy: Arc<StrategyExecutor>,
        notifier: Notifier,
    ) -> Self {
        Self {
            stores,
            lifecycle,
            strategy,
            notifier,
        }
    }

    pub async fn dispatch(&self, message: ClientMessage) -> Result<Reply, MessageError> {
        let mut reply = Reply::Accepted;
        for effect in plan(&message, self.strategy.origin())? {
            match effect {
                Effect::SkipWaiting => {
                    let state = self.lifecycle.skip_waiting().await?;
                    info!(state = state.as_str(), "Skip-wait signal handled");
                }
                Effect::Refresh(url) => {
                    // Refresh failures are not the client's problem; the
                    // previous entry stays in place.
                    if let Err(err) = self.strategy.refresh(url.clone()).await {
                        warn!(url = %url, error = %err, "Cache refresh failed");
                    }
                }
                Effect::DeleteAllStores => {
                    for name in self.stores.store_names().await? {
                        self.stores.delete_store(&name).await?;
                    }
                    info!("All cache stores cleared");
                }
                Effect::Broadcast(event) => {
                    self.notifier.broadcast(event);
                }
                Effect::ReplyStatus => reply = Reply::Status(self.status().await?),
            }
        }
        Ok(reply)
    }

    pub async fn status(&self) -> Result<StatusReport, StoreError> {
        let mut caches = BTreeMap::new();
        for name in self.stores.store_names().await? {
            let count = self.stores.list_keys(&name).await?.len();
            caches.insert(name, count);
        }

        Ok(StatusReport {
            version: self.lifecycle.serving().version().to_string(),
            state: self.lifecycle.state(),
            caches,
            strategies: ResourceClass::ALL
                .iter()
                .map(|class| (*class, class.strategy()))
                .collect(),
        })
    }
}
