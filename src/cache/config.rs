//! Cache configuration derived from `[cache]` settings.

use std::num::NonZeroU64;
use std::time::Duration;

use crate::config::{CacheSettings, DEFAULT_DYNAMIC_MAX_BYTES};

use super::classify::Classifier;
use super::keys::VersionSet;

const DEFAULT_EVICTION_RATIO_PERCENT: u8 = 30;

/// Runtime view of the cache settings shared by the strategy, eviction and
/// lifecycle components.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub name_prefix: String,
    pub version: String,
    /// Byte ceiling for the dynamic store.
    pub dynamic_max_bytes: NonZeroU64,
    pub eviction_interval: Duration,
    pub eviction_ratio_percent: u8,
    pub api_prefixes: Vec<String>,
    pub image_extensions: Vec<String>,
    /// Paths (relative to the upstream origin) fetched during install.
    pub precache: Vec<String>,
    pub offline_document: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name_prefix: "outpost".to_string(),
            version: "v1".to_string(),
            dynamic_max_bytes: NonZeroU64::new(DEFAULT_DYNAMIC_MAX_BYTES).unwrap_or(NonZeroU64::MIN),
            eviction_interval: Duration::from_secs(30 * 60),
            eviction_ratio_percent: DEFAULT_EVICTION_RATIO_PERCENT,
            api_prefixes: vec!["/api/".to_string()],
            image_extensions: ["jpg", "jpeg", "png", "gif", "webp", "svg"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            precache: vec!["/".to_string(), "/offline.html".to_string()],
            offline_document: "/offline.html".to_string(),
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            name_prefix: settings.name_prefix.clone(),
            version: settings.version.clone(),
            dynamic_max_bytes: settings.dynamic_max_bytes,
            eviction_interval: settings.eviction_interval,
            eviction_ratio_percent: settings.eviction_ratio_percent,
            api_prefixes: settings.api_prefixes.clone(),
            image_extensions: settings.image_extensions.clone(),
            precache: settings.precache.clone(),
            offline_document: settings.offline_document.clone(),
        }
    }
}

impl CacheConfig {
    /// Store names for the configured version.
    pub fn version_set(&self) -> VersionSet {
        VersionSet::new(self.name_prefix.clone(), self.version.clone())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.api_prefixes.clone(), self.image_extensions.clone())
    }

    /// Bytes an eviction pass must reclaim from a dynamic store holding
    /// `total` bytes, or `None` when the store is within its ceiling.
    ///
    /// The target is the configured share of the ceiling, raised when needed
    /// so that the store ends at or below the ceiling.
    pub fn eviction_target(&self, total: u64) -> Option<u64> {
        let ceiling = self.dynamic_max_bytes.get();
        if total <= ceiling {
            return None;
        }
        let share = ceiling.saturating_mul(u64::from(self.eviction_ratio_percent)) / 100;
        Some(share.max(total - ceiling))
    }
}
