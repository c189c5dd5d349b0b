//! Outpost cache layer.
//!
//! - **Store set**: named, versioned key/value stores ([`CacheStoreSet`])
//! - **Classifier**: maps a request to `static`, `data` or `image`
//! - **Eviction**: keeps the dynamic store under its byte ceiling
//!
//! Store names follow `{prefix}-{class}-{version}`; see [`VersionSet`].

mod classify;
mod config;
mod eviction;
mod keys;
pub(crate) mod lock;
mod store;

pub use classify::{Classifier, guess_content_type};
pub use config::CacheConfig;
pub use eviction::{EvictionManager, EvictionReport};
pub use keys::VersionSet;
pub use store::{CacheStoreSet, EntryMeta, MemoryStoreSet, SharedStoreSet, StoreError};
