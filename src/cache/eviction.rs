//! Byte-ceiling enforcement for the dynamic store.
//!
//! A pass sums entry sizes and, when the ceiling is exceeded, deletes entries
//! oldest-first by insertion time until the reclamation target is met. Passes
//! are serialized with each other but not with live strategy writes, so a
//! put landing mid-pass can leave the store briefly above the ceiling.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::types::StoreClass;
use crate::util::bytes::format_bytes;

use super::config::CacheConfig;
use super::keys::VersionSet;
use super::store::{SharedStoreSet, StoreError};

const METRIC_RECLAIMED_BYTES: &str = "outpost_eviction_reclaimed_bytes_total";
const METRIC_REMOVED: &str = "outpost_eviction_removed_total";

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionReport {
    pub before_bytes: u64,
    pub reclaimed_bytes: u64,
    pub removed: usize,
}

impl EvictionReport {
    pub fn after_bytes(&self) -> u64 {
        self.before_bytes.saturating_sub(self.reclaimed_bytes)
    }
}

pub struct EvictionManager {
    stores: SharedStoreSet,
    config: Arc<CacheConfig>,
    pass_lock: Mutex<()>,
}

impl EvictionManager {
    pub fn new(stores: SharedStoreSet, config: Arc<CacheConfig>) -> Self {
        Self {
            stores,
            config,
            pass_lock: Mutex::new(()),
        }
    }

    /// Run one pass over the dynamic store of `versions`. Individual delete
    /// failures are logged and skipped; only an unreadable store aborts the
    /// pass.
    pub async fn run_pass(&self, versions: &VersionSet) -> Result<EvictionReport, StoreError> {
        let _guard = self.pass_lock.lock().await;
        let dynamic = versions.name(StoreClass::Dynamic);
        let store = dynamic.as_str();

        let mut entries = self.stores.list_entries(store).await?;
        let before_bytes: u64 = entries.iter().map(|entry| entry.size).sum();
        let mut report = EvictionReport {
            before_bytes,
            ..EvictionReport::default()
        };

        let Some(target) = self.config.eviction_target(before_bytes) else {
            debug!(
                store,
                total = %format_bytes(before_bytes),
                ceiling = %format_bytes(self.config.dynamic_max_bytes.get()),
                "Dynamic store within ceiling"
            );
            return Ok(report);
        };

        entries.sort_by(|a, b| {
            a.inserted_at
                .cmp(&b.inserted_at)
                .then_with(|| a.key.cmp(&b.key))
        });

        for entry in entries {
            if report.reclaimed_bytes >= target {
                break;
            }
            match self.stores.delete(store, &entry.key).await {
                Ok(true) => {
                    report.reclaimed_bytes += entry.size;
                    report.removed += 1;
                }
                // Replaced or removed concurrently; nothing reclaimed here.
                Ok(false) => {}
                Err(err) => {
                    warn!(store, key = %entry.key, error = %err, "Failed to evict cache entry");
                }
            }
        }

        counter!(METRIC_RECLAIMED_BYTES).increment(report.reclaimed_bytes);
        counter!(METRIC_REMOVED).increment(report.removed as u64);

        info!(
            store,
            before = %format_bytes(report.before_bytes),
            reclaimed = %format_bytes(report.reclaimed_bytes),
            target = %format_bytes(target),
            removed = report.removed,
            "Eviction pass completed"
        );

        Ok(report)
    }
}
