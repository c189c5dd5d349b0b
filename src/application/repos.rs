//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::OutboxItem;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox persistence error: {0}")]
    Persistence(String),
    #[error("outbox item `{id}` could not be encoded: {message}")]
    Encode { id: String, message: String },
    #[error("outbox item `{0}` not found")]
    NotFound(String),
}

impl OutboxError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Durable storage behind the outbox queue.
#[async_trait]
pub trait OutboxRepo: Send + Sync {
    async fn append(&self, item: &OutboxItem) -> Result<(), OutboxError>;

    /// Overwrite the stored copy of an existing item.
    async fn save(&self, item: &OutboxItem) -> Result<(), OutboxError>;

    /// Returns whether the item was present.
    async fn remove(&self, id: &str) -> Result<bool, OutboxError>;

    /// Every stored item, oldest first.
    async fn load_all(&self) -> Result<Vec<OutboxItem>, OutboxError>;
}
