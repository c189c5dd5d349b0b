//! Lifecycle manager: install, activate and versioned cutover.
//!
//! ```text
//! installing ──install ok──▶ waiting ──skip-wait / auto──▶ activating ──▶ active
//!      ▲                                                                  │
//!      └──────────────────────── install(new version) ────────────────────┘
//! ```
//!
//! A failed install commits nothing and leaves the previously active version
//! serving. On startup that version is recovered from the stores on disk.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::cache::lock::{rw_read, rw_write};
use crate::cache::{CacheStoreSet, SharedStoreSet, StoreError, VersionSet, guess_content_type};
use crate::domain::entities::{CacheEntry, RequestKey};
use crate::domain::types::{LifecycleState, StoreClass};

use super::network::{Network, NetworkRequest};
use super::notify::{Notifier, ServerEvent};

const SOURCE: &str = "application::lifecycle";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to precache `{url}`: {reason}")]
    Precache { url: String, reason: String },
    #[error("invalid precache path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
struct Phase {
    state: LifecycleState,
    active: Option<VersionSet>,
    pending: Option<VersionSet>,
    skip_requested: bool,
}

pub struct LifecycleManager {
    stores: SharedStoreSet,
    network: Arc<dyn Network>,
    notifier: Notifier,
    origin: Url,
    precache: Vec<String>,
    auto_skip_waiting: bool,
    /// Stores addressed before the first install completes.
    initial: VersionSet,
    phase: RwLock<Phase>,
    install_lock: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        stores: SharedStoreSet,
        network: Arc<dyn Network>,
        notifier: Notifier,
        origin: Url,
        precache: Vec<String>,
        initial: VersionSet,
        auto_skip_waiting: bool,
    ) -> Self {
        Self {
            stores,
            network,
            notifier,
            origin,
            precache,
            auto_skip_waiting,
            initial,
            phase: RwLock::new(Phase {
                state: LifecycleState::Installing,
                active: None,
                pending: None,
                skip_requested: false,
            }),
            install_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        rw_read(&self.phase, SOURCE, "state").state
    }

    /// Precache content is only trusted once a version has been activated,
    /// including while a newer one installs.
    pub fn precache_authoritative(&self) -> bool {
        rw_read(&self.phase, SOURCE, "precache_authoritative")
            .active
            .is_some()
    }

    /// Version set whose stores answer requests right now.
    pub fn serving(&self) -> VersionSet {
        let phase = rw_read(&self.phase, SOURCE, "serving");
        phase
            .active
            .as_ref()
            .or(phase.pending.as_ref())
            .unwrap_or(&self.initial)
            .clone()
    }

    pub fn active_version(&self) -> Option<VersionSet> {
        rw_read(&self.phase, SOURCE, "active_version").active.clone()
    }

    /// Adopt a version whose precache is already complete in the store set.
    ///
    /// The configured version wins when its static store holds the whole
    /// manifest. Otherwise a single complete version under the same prefix is
    /// taken. Nothing is adopted when several candidates qualify.
    pub async fn resume(&self) -> Result<Option<VersionSet>, LifecycleError> {
        if let Some(active) = self.active_version() {
            return Ok(Some(active));
        }

        let mut complete = Vec::new();
        for name in self.stores.store_names().await? {
            let Some(candidate) =
                VersionSet::owning(self.initial.prefix(), StoreClass::Static, &name)
            else {
                continue;
            };
            if self.precache_complete(&name).await? {
                complete.push(candidate);
            }
        }

        let adopted = if complete.contains(&self.initial) {
            Some(self.initial.clone())
        } else if complete.len() == 1 {
            complete.pop()
        } else {
            if !complete.is_empty() {
                warn!(
                    candidates = complete.len(),
                    "Several cached versions on disk; adopting none"
                );
            }
            None
        };

        if let Some(versions) = &adopted {
            let mut phase = rw_write(&self.phase, SOURCE, "resume");
            phase.active = Some(versions.clone());
            phase.state = LifecycleState::Active;
            info!(version = versions.version(), "Resumed cached version");
        }
        Ok(adopted)
    }

    /// Install `versions`: precache the manifest, commit it to the new static
    /// store and sweep stale stores. Activates immediately when skip-waiting
    /// is configured or was requested.
    pub async fn install(&self, versions: VersionSet) -> Result<LifecycleState, LifecycleError> {
        let _guard = self.install_lock.lock().await;

        if let Err(err) = self.resume().await {
            warn!(error = %err, "Could not inspect cached versions");
        }

        {
            let mut phase = rw_write(&self.phase, SOURCE, "install_begin");
            phase.state = LifecycleState::Installing;
            phase.pending = Some(versions.clone());
        }
        info!(version = versions.version(), "Installing cache version");

        let committed = match self.commit_precache(&versions).await {
            Ok(()) => self.sweep(&versions).await.map(|_| ()),
            Err(err) => Err(err),
        };
        if let Err(err) = committed {
            warn!(version = versions.version(), error = %err, "Install failed; previous version keeps serving");
            let mut phase = rw_write(&self.phase, SOURCE, "install_abort");
            phase.pending = None;
            if phase.active.is_some() {
                phase.state = LifecycleState::Active;
            }
            return Err(err);
        }

        self.notifier.broadcast(ServerEvent::Installed {
            version: versions.version().to_string(),
        });

        let skip = {
            let mut phase = rw_write(&self.phase, SOURCE, "install_complete");
            phase.state = LifecycleState::Waiting;
            let requested = std::mem::take(&mut phase.skip_requested);
            self.auto_skip_waiting || requested
        };

        if skip {
            self.activate().await
        } else {
            info!(version = versions.version(), "Installed; waiting for skip-wait signal");
            Ok(LifecycleState::Waiting)
        }
    }

    /// Promote the waiting version. A no-op unless a version is waiting.
    pub async fn activate(&self) -> Result<LifecycleState, LifecycleError> {
        let versions = {
            let mut phase = rw_write(&self.phase, SOURCE, "activate_begin");
            match (phase.state, phase.pending.clone()) {
                (LifecycleState::Waiting, Some(pending)) => {
                    phase.state = LifecycleState::Activating;
                    pending
                }
                (state, _) => return Ok(state),
            }
        };

        if let Err(err) = self.sweep(&versions).await {
            rw_write(&self.phase, SOURCE, "activate_abort").state = LifecycleState::Waiting;
            return Err(err);
        }

        {
            let mut phase = rw_write(&self.phase, SOURCE, "activate_complete");
            phase.active = phase.pending.take();
            phase.state = LifecycleState::Active;
        }
        info!(version = versions.version(), "Cache version active");
        self.notifier.broadcast(ServerEvent::Activated {
            version: versions.version().to_string(),
        });
        Ok(LifecycleState::Active)
    }

    /// Skip-wait signal: activate a waiting version now, or remember the
    /// request for the next install.
    pub async fn skip_waiting(&self) -> Result<LifecycleState, LifecycleError> {
        let waiting = {
            let mut phase = rw_write(&self.phase, SOURCE, "skip_waiting");
            if phase.state == LifecycleState::Waiting {
                true
            } else {
                phase.skip_requested = true;
                false
            }
        };

        if waiting {
            self.activate().await
        } else {
            Ok(self.state())
        }
    }

    /// Delete every store that is not one of `keep`'s four stores.
    pub async fn sweep(&self, keep: &VersionSet) -> Result<Vec<String>, LifecycleError> {
        let mut removed = Vec::new();
        for name in self.stores.store_names().await? {
            if keep.contains(&name) {
                continue;
            }
            if self.stores.delete_store(&name).await? {
                info!(store = %name, "Deleted stale cache store");
                removed.push(name);
            }
        }
        Ok(removed)
    }

    async fn precache_complete(&self, static_store: &str) -> Result<bool, LifecycleError> {
        let stored: HashSet<RequestKey> = self
            .stores
            .list_keys(static_store)
            .await?
            .into_iter()
            .collect();
        if stored.is_empty() {
            return Ok(false);
        }
        Ok(self.precache.iter().all(|path| {
            self.origin
                .join(path)
                .is_ok_and(|url| stored.contains(&RequestKey::get(&url)))
        }))
    }

    async fn commit_precache(&self, versions: &VersionSet) -> Result<(), LifecycleError> {
        let fetches = self.precache.iter().map(|path| self.fetch_manifest_entry(path));
        let entries = join_all(fetches)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        for name in versions.names() {
            self.stores.open(&name).await?;
        }

        let static_store = versions.name(StoreClass::Static);
        for entry in entries {
            if let Err(err) = self.stores.put(&static_store, entry).await {
                self.discard_partial(versions, &static_store).await;
                return Err(err.into());
            }
        }
        Ok(())
    }

    async fn fetch_manifest_entry(&self, path: &str) -> Result<CacheEntry, LifecycleError> {
        let url = self
            .origin
            .join(path)
            .map_err(|err| LifecycleError::InvalidPath {
                path: path.to_string(),
                reason: err.to_string(),
            })?;

        let response = self
            .network
            .fetch(NetworkRequest::get(url.clone()))
            .await
            .map_err(|err| LifecycleError::Precache {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        if !response.is_success() {
            return Err(LifecycleError::Precache {
                url: url.to_string(),
                reason: format!("upstream answered {}", response.status),
            });
        }

        let content_type = response
            .content_type
            .unwrap_or_else(|| guess_content_type(&url));
        Ok(CacheEntry::new(RequestKey::get(&url), response.body, content_type))
    }

    /// Remove a half-written static store, unless it is the one being served.
    async fn discard_partial(&self, versions: &VersionSet, static_store: &str) {
        if self.active_version().as_ref() == Some(versions) {
            return;
        }
        if let Err(err) = self.stores.delete_store(static_store).await {
            warn!(store = static_store, error = %err, "Failed to discard partial precache");
        }
    }
}
