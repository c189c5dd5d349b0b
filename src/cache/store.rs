//! Cache store set abstraction and the in-memory implementation.
//!
//! A store set is a collection of named stores, each mapping a
//! [`RequestKey`] to one [`CacheEntry`]. Operations are atomic per entry;
//! there are no cross-entry transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::{CacheEntry, RequestKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store `{store}` i/o failure: {source}")]
    Io {
        store: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache store `{store}` holds a corrupt entry: {reason}")]
    Corrupt { store: String, reason: String },
    #[error("cache store `{store}` could not encode entry: {source}")]
    Encode {
        store: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn io(store: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            store: store.into(),
            source,
        }
    }

    pub fn corrupt(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            store: store.into(),
            reason: reason.into(),
        }
    }
}

/// Size and age of an entry, without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: RequestKey,
    pub size: u64,
    pub inserted_at: OffsetDateTime,
}

impl From<&CacheEntry> for EntryMeta {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            size: entry.size,
            inserted_at: entry.inserted_at,
        }
    }
}

#[async_trait]
pub trait CacheStoreSet: Send + Sync {
    /// Create the store if it does not exist yet. Idempotent.
    async fn open(&self, name: &str) -> Result<(), StoreError>;

    /// Missing stores behave like empty ones.
    async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry for `entry.key`, creating the store on demand.
    async fn put(&self, store: &str, entry: CacheEntry) -> Result<(), StoreError>;

    async fn delete(&self, store: &str, key: &RequestKey) -> Result<bool, StoreError>;

    async fn list_keys(&self, store: &str) -> Result<Vec<RequestKey>, StoreError>;

    async fn list_entries(&self, store: &str) -> Result<Vec<EntryMeta>, StoreError>;

    async fn delete_store(&self, name: &str) -> Result<bool, StoreError>;

    /// Every store currently present, across all versions.
    async fn store_names(&self) -> Result<Vec<String>, StoreError>;
}

pub type SharedStoreSet = Arc<dyn CacheStoreSet>;

/// Process-local store set. Used by tests and as a non-durable fallback.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreSet {
    stores: Arc<DashMap<String, HashMap<RequestKey, CacheEntry>>>,
}

impl MemoryStoreSet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStoreSet for MemoryStoreSet {
    async fn open(&self, name: &str) -> Result<(), StoreError> {
        self.stores.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, store: &str, key: &RequestKey) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self
            .stores
            .get(store)
            .and_then(|entries| entries.get(key).cloned()))
    }

    async fn put(&self, store: &str, entry: CacheEntry) -> Result<(), StoreError> {
        self.stores
            .entry(store.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, store: &str, key: &RequestKey) -> Result<bool, StoreError> {
        Ok(self
            .stores
            .get_mut(store)
            .is_some_and(|mut entries| entries.remove(key).is_some()))
    }

    async fn list_keys(&self, store: &str) -> Result<Vec<RequestKey>, StoreError> {
        Ok(self
            .stores
            .get(store)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_entries(&self, store: &str) -> Result<Vec<EntryMeta>, StoreError> {
        Ok(self
            .stores
            .get(store)
            .map(|entries| entries.values().map(EntryMeta::from).collect())
            .unwrap_or_default())
    }

    async fn delete_store(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.stores.remove(name).is_some())
    }

    async fn store_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.stores.iter().map(|item| item.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}
