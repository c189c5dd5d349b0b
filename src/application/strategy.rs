//! Strategy executor: resolves every intercepted GET into a response.
//!
//! `static` and `image` requests are served cache-first, `data` requests
//! network-first. Network and storage failures never surface as errors:
//! every path ends in a cached copy, a live response or a synthesized
//! fallback.

use std::sync::Arc;

use axum::http::StatusCode;
use bytes::Bytes;
use metrics::counter;
use serde_json::json;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheConfig, CacheStoreSet, Classifier, SharedStoreSet, guess_content_type};
use crate::domain::entities::{CacheEntry, RequestKey};
use crate::domain::types::{ResourceClass, StoreClass, Strategy};

use super::lifecycle::LifecycleManager;
use super::network::{Network, NetworkError, NetworkRequest, NetworkResponse};
use super::notify::{Notifier, ServerEvent};

const METRIC_HIT: &str = "outpost_cache_hit_total";
const METRIC_MISS: &str = "outpost_cache_miss_total";
const METRIC_FALLBACK: &str = "outpost_cache_fallback_total";
const METRIC_STORE_ERROR: &str = "outpost_cache_store_error_total";

const UNAVAILABLE_BODY: &str = "Resource unavailable";
const PLACEHOLDER_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="300" height="300" viewBox="0 0 300 300">"##,
    r##"<rect width="300" height="300" fill="#d7ccc8"/>"##,
    r##"<text x="150" y="150" font-family="sans-serif" font-size="18" fill="#4e342e" "##,
    r##"text-anchor="middle" dominant-baseline="middle">Image unavailable</text></svg>"##
);

/// Where a response body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Fallback,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Served {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
    pub source: ResponseSource,
    pub class: ResourceClass,
}

impl Served {
    fn from_entry(entry: CacheEntry, class: ResourceClass, source: ResponseSource) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: entry.content_type,
            body: entry.payload,
            source,
            class,
        }
    }

    fn from_network(response: NetworkResponse, content_type: String, class: ResourceClass) -> Self {
        Self {
            status: response.status,
            content_type,
            body: response.body,
            source: ResponseSource::Network,
            class,
        }
    }
}

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("upstream answered {status} for `{url}`")]
    Status { url: String, status: StatusCode },
    #[error(transparent)]
    Store(#[from] crate::cache::StoreError),
}

pub struct StrategyExecutor {
    stores: SharedStoreSet,
    network: Arc<dyn Network>,
    lifecycle: Arc<LifecycleManager>,
    notifier: Notifier,
    classifier: Classifier,
    config: Arc<CacheConfig>,
    origin: Url,
}

impl StrategyExecutor {
    pub fn new(
        stores: SharedStoreSet,
        network: Arc<dyn Network>,
        lifecycle: Arc<LifecycleManager>,
        notifier: Notifier,
        config: Arc<CacheConfig>,
        origin: Url,
    ) -> Self {
        Self {
            classifier: config.classifier(),
            stores,
            network,
            lifecycle,
            notifier,
            config,
            origin,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolve a GET request through the protocol of its class.
    pub async fn handle(&self, request: NetworkRequest) -> Served {
        let class = self.classifier.classify(&request.url);
        match class.strategy() {
            Strategy::CacheFirst => self.cache_first(class, request).await,
            Strategy::NetworkFirst => self.network_first(class, request).await,
        }
    }

    /// Forward a non-cacheable request verbatim. Transport failures yield the
    /// structured offline body.
    pub async fn pass_through(&self, request: NetworkRequest) -> Served {
        let class = self.classifier.classify(&request.url);
        let url = request.url.clone();
        match self.network.fetch(request).await {
            Ok(response) => {
                let content_type = response
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Served::from_network(response, content_type, class)
            }
            Err(err) => {
                debug!(url = %url, error = %err, "Pass-through request failed");
                offline_response(&url, class)
            }
        }
    }

    async fn cache_first(&self, class: ResourceClass, request: NetworkRequest) -> Served {
        let key = RequestKey::get(&request.url);
        let versions = self.lifecycle.serving();

        for store in self.lookup_order(class) {
            let name = versions.name(store);
            if let Some(entry) = self.lookup(&name, &key).await {
                counter!(METRIC_HIT, "class" => class.as_str()).increment(1);
                debug!(class = class.as_str(), store = %name, key = %key, outcome = "hit", "Served from cache");
                return Served::from_entry(entry, class, ResponseSource::Cache);
            }
        }
        counter!(METRIC_MISS, "class" => class.as_str()).increment(1);

        let url = request.url.clone();
        let wants_html = request.accepts_html();
        match self.network.fetch(request).await {
            Ok(response) if response.is_success() => {
                let content_type = self.content_type_for(&response, &url);
                let entry = CacheEntry::new(key, response.body.clone(), content_type.clone());
                self.store(&versions.name(class.runtime_store()), entry).await;
                Served::from_network(response, content_type, class)
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status, "Passing through unsuccessful response uncached");
                let content_type = self.content_type_for(&response, &url);
                Served::from_network(response, content_type, class)
            }
            Err(err) => {
                debug!(url = %url, error = %err, "Network unavailable on cache miss");
                counter!(METRIC_FALLBACK, "class" => class.as_str()).increment(1);
                match class {
                    ResourceClass::Image => placeholder_image(),
                    _ => self.static_fallback(wants_html).await,
                }
            }
        }
    }

    async fn network_first(&self, class: ResourceClass, request: NetworkRequest) -> Served {
        let key = RequestKey::get(&request.url);
        let url = request.url.clone();
        let store = self.lifecycle.serving().name(class.runtime_store());

        let unusable = match self.network.fetch(request).await {
            Ok(response) if response.is_success() => {
                let content_type = self.content_type_for(&response, &url);
                let entry = CacheEntry::new(key, response.body.clone(), content_type.clone());
                self.store(&store, entry).await;
                self.notifier.broadcast(ServerEvent::DataUpdated {
                    url: url.to_string(),
                });
                return Served::from_network(response, content_type, class);
            }
            Ok(response) => Some(response),
            Err(err) => {
                debug!(url = %url, error = %err, "Network unavailable for data request");
                None
            }
        };

        if let Some(entry) = self.lookup(&store, &key).await {
            counter!(METRIC_HIT, "class" => class.as_str()).increment(1);
            debug!(class = class.as_str(), store = %store, key = %key, outcome = "stale", "Served data from cache");
            return Served::from_entry(entry, class, ResponseSource::Cache);
        }
        counter!(METRIC_MISS, "class" => class.as_str()).increment(1);

        match unusable {
            // A live answer beats a synthesized one when nothing is cached.
            Some(response) => {
                let content_type = self.content_type_for(&response, &url);
                Served::from_network(response, content_type, class)
            }
            None => {
                counter!(METRIC_FALLBACK, "class" => class.as_str()).increment(1);
                offline_response(&url, class)
            }
        }
    }

    /// Fetch `url` and store it in the runtime store of its class.
    pub async fn refresh(&self, url: Url) -> Result<ResourceClass, RefreshError> {
        let class = self.classifier.classify(&url);
        let response = self.network.fetch(NetworkRequest::get(url.clone())).await?;
        if !response.is_success() {
            return Err(RefreshError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }

        let content_type = self.content_type_for(&response, &url);
        let store = self.lifecycle.serving().name(class.runtime_store());
        let entry = CacheEntry::new(RequestKey::get(&url), response.body, content_type);
        self.stores.put(&store, entry).await?;
        debug!(url = %url, store = %store, "Refreshed cache entry");
        Ok(class)
    }

    /// Refresh a data resource and tell clients about it.
    pub async fn refresh_and_announce(&self, url: Url) -> Result<(), RefreshError> {
        self.refresh(url.clone()).await?;
        self.notifier.broadcast(ServerEvent::DataUpdated {
            url: url.to_string(),
        });
        Ok(())
    }

    fn lookup_order(&self, class: ResourceClass) -> Vec<StoreClass> {
        match class {
            ResourceClass::Static if self.lifecycle.precache_authoritative() => {
                vec![StoreClass::Static, StoreClass::Dynamic]
            }
            other => vec![other.runtime_store()],
        }
    }

    async fn lookup(&self, store: &str, key: &RequestKey) -> Option<CacheEntry> {
        match self.stores.get(store, key).await {
            Ok(entry) => entry,
            Err(err) => {
                counter!(METRIC_STORE_ERROR).increment(1);
                warn!(store, key = %key, error = %err, "Cache lookup failed; treating as miss");
                None
            }
        }
    }

    async fn store(&self, store: &str, entry: CacheEntry) {
        let key = entry.key.clone();
        if let Err(err) = self.stores.put(store, entry).await {
            counter!(METRIC_STORE_ERROR).increment(1);
            warn!(store, key = %key, error = %err, "Skipping cache write");
        }
    }

    async fn static_fallback(&self, wants_html: bool) -> Served {
        if wants_html {
            let offline = self.origin.join(&self.config.offline_document);
            if let Ok(url) = offline {
                let store = self.lifecycle.serving().name(StoreClass::Static);
                if let Some(entry) = self.lookup(&store, &RequestKey::get(&url)).await {
                    return Served::from_entry(entry, ResourceClass::Static, ResponseSource::Fallback);
                }
            }
        }

        Served {
            status: StatusCode::SERVICE_UNAVAILABLE,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: Bytes::from_static(UNAVAILABLE_BODY.as_bytes()),
            source: ResponseSource::Fallback,
            class: ResourceClass::Static,
        }
    }

    fn content_type_for(&self, response: &NetworkResponse, url: &Url) -> String {
        response
            .content_type
            .clone()
            .unwrap_or_else(|| guess_content_type(url))
    }
}

fn placeholder_image() -> Served {
    Served {
        status: StatusCode::OK,
        content_type: "image/svg+xml".to_string(),
        body: Bytes::from_static(PLACEHOLDER_SVG.as_bytes()),
        source: ResponseSource::Fallback,
        class: ResourceClass::Image,
    }
}

/// Structured 503 body naming the request that could not be served.
pub fn offline_response(url: &Url, class: ResourceClass) -> Served {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let body = json!({
        "error": "offline",
        "message": "The network is unavailable and no cached copy exists.",
        "url": url.as_str(),
        "timestamp": timestamp,
    });

    Served {
        status: StatusCode::SERVICE_UNAVAILABLE,
        content_type: "application/json".to_string(),
        body: Bytes::from(body.to_string()),
        source: ResponseSource::Fallback,
        class,
    }
}
