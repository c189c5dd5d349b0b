//! Shared harness for the router-level tests: an in-memory upstream, an
//! in-memory order endpoint and a fully wired router.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::Url;

use outpost::application::{
    lifecycle::LifecycleManager,
    messages::MessageRouter,
    network::{DeliveryError, Network, NetworkError, NetworkRequest, NetworkResponse, OrderEndpoint},
    notify::Notifier,
    outbox::{OutboxQueue, RetryPolicy},
    strategy::StrategyExecutor,
};
use outpost::cache::{CacheConfig, MemoryStoreSet, SharedStoreSet};
use outpost::domain::entities::OutboxItem;
use outpost::infra::http::{RouterState, SyncOptions, build_router};
use outpost::infra::outbox::MemoryOutboxRepo;

pub const ORIGIN: &str = "http://cafe.test/";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Default)]
pub struct Upstream {
    routes: Mutex<HashMap<String, NetworkResponse>>,
    offline: AtomicBool,
}

impl Upstream {
    pub fn serve(&self, path: &str, content_type: &str, body: &str) {
        self.routes.lock().unwrap().insert(
            url(path).to_string(),
            NetworkResponse {
                status: StatusCode::OK,
                content_type: Some(content_type.to_string()),
                body: Bytes::from(body.to_string()),
            },
        );
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Network for Upstream {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::transport(&request.url, "connection refused"));
        }
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(request.url.as_str())
            .cloned()
            .unwrap_or(NetworkResponse {
                status: StatusCode::NOT_FOUND,
                content_type: Some("text/plain".to_string()),
                body: Bytes::from_static(b"not found"),
            }))
    }
}

#[derive(Default)]
pub struct Orders {
    offline: AtomicBool,
    delivered: Mutex<Vec<String>>,
}

impl Orders {
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderEndpoint for Orders {
    async fn submit(&self, item: &OutboxItem) -> Result<(), DeliveryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport {
                url: format!("{ORIGIN}api/send-order"),
                message: "connection refused".to_string(),
            }
            .into());
        }
        self.delivered.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}

pub struct Harness {
    pub router: Router,
    pub stores: MemoryStoreSet,
    pub upstream: Arc<Upstream>,
    pub orders: Arc<Orders>,
    pub notifier: Notifier,
    pub lifecycle: Arc<LifecycleManager>,
    pub outbox: Arc<OutboxQueue>,
    pub outbox_repo: Arc<MemoryOutboxRepo>,
}

/// Router over an upstream that serves the precache manifest and a menu.
/// The v1 precache is installed and active before the harness is returned.
pub async fn harness(background_sync: bool) -> Harness {
    let upstream = Arc::new(Upstream::default());
    upstream.serve("/", "text/html", "<h1>Cafe</h1>");
    upstream.serve("/offline.html", "text/html", "<h1>Offline</h1>");
    upstream.serve("/api/menu.json", "application/json", r#"{"items":["espresso"]}"#);

    let stores = MemoryStoreSet::new();
    let shared: SharedStoreSet = Arc::new(stores.clone());
    let notifier = Notifier::default();
    let config = Arc::new(CacheConfig::default());
    let origin = Url::parse(ORIGIN).unwrap();

    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&shared),
        upstream.clone(),
        notifier.clone(),
        origin.clone(),
        config.precache.clone(),
        config.version_set(),
        true,
    ));
    lifecycle.install(config.version_set()).await.unwrap();

    let strategy = Arc::new(StrategyExecutor::new(
        Arc::clone(&shared),
        upstream.clone(),
        Arc::clone(&lifecycle),
        notifier.clone(),
        Arc::clone(&config),
        origin,
    ));
    let messages = Arc::new(MessageRouter::new(
        Arc::clone(&shared),
        Arc::clone(&lifecycle),
        Arc::clone(&strategy),
        notifier.clone(),
    ));

    let orders = Arc::new(Orders::default());
    let outbox_repo = Arc::new(MemoryOutboxRepo::new());
    let outbox = Arc::new(OutboxQueue::new(
        outbox_repo.clone(),
        orders.clone(),
        notifier.clone(),
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        },
    ));

    let router = build_router(RouterState {
        strategy,
        messages,
        outbox: Arc::clone(&outbox),
        notifier: notifier.clone(),
        sync: SyncOptions {
            background_sync,
            fallback_delay: Duration::from_millis(50),
            menu_url: url("/api/menu.json"),
        },
    });

    Harness {
        router,
        stores,
        upstream,
        orders,
        notifier,
        lifecycle,
        outbox,
        outbox_repo,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    Reply {
        status,
        headers,
        body,
    }
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

pub fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}
