//! Publish/subscribe channel from the proxy to connected foreground clients.
//!
//! Delivery is best-effort: events are not queued for clients that subscribe
//! later, and a subscriber that falls behind the channel capacity loses the
//! oldest events.

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::messages::StatusReport;

const DEFAULT_CAPACITY: usize = 256;

/// Outbound event types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Installed { version: String },
    Activated { version: String },
    DataUpdated { url: String },
    OrderSynced { order_id: String },
    SyncStarted { pending: usize },
    SyncCompleted {
        succeeded: usize,
        failed: usize,
        total: usize,
    },
    SyncFailed { error: String },
    CacheCleared {},
    StatusResponse(StatusReport),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Installed { .. } => "installed",
            ServerEvent::Activated { .. } => "activated",
            ServerEvent::DataUpdated { .. } => "data-updated",
            ServerEvent::OrderSynced { .. } => "order-synced",
            ServerEvent::SyncStarted { .. } => "sync-started",
            ServerEvent::SyncCompleted { .. } => "sync-completed",
            ServerEvent::SyncFailed { .. } => "sync-failed",
            ServerEvent::CacheCleared {} => "cache-cleared",
            ServerEvent::StatusResponse(_) => "status-response",
        }
    }
}

/// An event stamped with the time it was published.
#[derive(Debug, Clone)]
pub struct Notification {
    pub event: ServerEvent,
    pub emitted_at: OffsetDateTime,
}

impl Notification {
    pub fn new(event: ServerEvent) -> Self {
        Self {
            event,
            emitted_at: OffsetDateTime::now_utc(),
        }
    }

    /// The `{type, data}` envelope with `data.timestamp` filled in.
    pub fn to_envelope(&self) -> Value {
        let mut envelope = serde_json::to_value(&self.event).unwrap_or_else(|err| {
            warn!(kind = self.event.kind(), error = %err, "Failed to encode notification");
            serde_json::json!({ "type": self.event.kind() })
        });
        let timestamp = self
            .emitted_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.emitted_at.unix_timestamp().to_string());

        if let Some(object) = envelope.as_object_mut() {
            let data = object
                .entry("data")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(data) = data.as_object_mut() {
                data.insert("timestamp".to_string(), Value::String(timestamp));
            }
        }
        envelope
    }
}

#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let kind = event.kind();
        match self.sender.send(Notification::new(event)) {
            Ok(receivers) => {
                debug!(kind, receivers, "Broadcast notification");
                receivers
            }
            Err(_) => {
                debug!(kind, "No subscribers for notification");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_type_data_and_timestamp() {
        let note = Notification::new(ServerEvent::SyncCompleted {
            succeeded: 3,
            failed: 0,
            total: 3,
        });
        let envelope = note.to_envelope();

        assert_eq!(envelope["type"], "sync-completed");
        assert_eq!(envelope["data"]["succeeded"], 3);
        assert_eq!(envelope["data"]["failed"], 0);
        assert_eq!(envelope["data"]["total"], 3);
        assert!(envelope["data"]["timestamp"].is_string());
    }

    #[test]
    fn field_names_are_camel_case() {
        let envelope = Notification::new(ServerEvent::OrderSynced {
            order_id: "ord_1".to_string(),
        })
        .to_envelope();
        assert_eq!(envelope["type"], "order-synced");
        assert_eq!(envelope["data"]["orderId"], "ord_1");
    }

    #[test]
    fn empty_events_still_get_a_timestamp() {
        let envelope = Notification::new(ServerEvent::CacheCleared {}).to_envelope();
        assert_eq!(envelope["type"], "cache-cleared");
        assert!(envelope["data"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let notifier = Notifier::default();
        assert_eq!(
            notifier.broadcast(ServerEvent::DataUpdated {
                url: "/api/menu.json".to_string()
            }),
            0
        );

        let mut rx = notifier.subscribe();
        notifier.broadcast(ServerEvent::Activated {
            version: "v2".to_string(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.kind(), "activated");
        assert!(rx.try_recv().is_err());
    }
}
