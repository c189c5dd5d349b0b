//! In-memory collaborators shared by the application unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use url::Url;

use crate::domain::entities::OutboxItem;

use super::network::{
    DeliveryError, Network, NetworkError, NetworkRequest, NetworkResponse, OrderEndpoint,
};

pub(crate) const ORIGIN: &str = "http://origin.test/";

pub(crate) fn origin() -> Url {
    Url::parse(ORIGIN).unwrap()
}

pub(crate) fn url(path: &str) -> Url {
    origin().join(path).unwrap()
}

/// Upstream double keyed by absolute URL. Unknown URLs answer 404.
#[derive(Default)]
pub(crate) struct FakeNetwork {
    routes: Mutex<HashMap<String, NetworkResponse>>,
    offline: AtomicBool,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeNetwork {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(&self, path: &str, content_type: &str, body: &str) {
        self.respond(path, StatusCode::OK, content_type, body);
    }

    pub(crate) fn respond(&self, path: &str, status: StatusCode, content_type: &str, body: &str) {
        self.routes.lock().unwrap().insert(
            url(path).to_string(),
            NetworkResponse {
                status,
                content_type: Some(content_type.to_string()),
                body: Bytes::from(body.to_string()),
            },
        );
    }

    /// Make a single URL fail at the transport level.
    pub(crate) fn break_path(&self, path: &str) {
        self.failing.lock().unwrap().insert(url(path).to_string());
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst)
            || self.failing.lock().unwrap().contains(request.url.as_str())
        {
            return Err(NetworkError::transport(&request.url, "connection refused"));
        }
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or(NetworkResponse {
                status: StatusCode::NOT_FOUND,
                content_type: Some("text/plain".to_string()),
                body: Bytes::from_static(b"not found"),
            }))
    }
}

/// Order endpoint double that records deliveries.
#[derive(Default)]
pub(crate) struct FakeEndpoint {
    offline: AtomicBool,
    rejected: Mutex<HashSet<String>>,
    delivered: Mutex<Vec<String>>,
}

impl FakeEndpoint {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn reject(&self, id: &str) {
        self.rejected.lock().unwrap().insert(id.to_string());
    }

    pub(crate) fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderEndpoint for FakeEndpoint {
    async fn submit(&self, item: &OutboxItem) -> Result<(), DeliveryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::transport(&url("/api/send-order"), "offline").into());
        }
        if self.rejected.lock().unwrap().contains(&item.id) {
            return Err(DeliveryError::Rejected {
                status: StatusCode::INTERNAL_SERVER_ERROR,
            });
        }
        self.delivered.lock().unwrap().push(item.id.clone());
        Ok(())
    }
}
