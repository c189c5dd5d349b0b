//! Seams to the upstream origin: the general network fetch used by the
//! strategy executor and the order write endpoint used by the outbox.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::domain::entities::OutboxItem;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to `{url}` failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to `{url}` timed out")]
    Timeout { url: String },
}

impl NetworkError {
    pub fn transport(url: &Url, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(url: &Url) -> Self {
        Self::Timeout {
            url: url.to_string(),
        }
    }
}

/// An outgoing request, already resolved against the upstream origin.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub method: Method,
    pub url: Url,
    /// Value of the caller's `Accept` header, used to pick fallbacks.
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl NetworkRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            accept: None,
            content_type: None,
            body: Bytes::new(),
        }
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Whether the caller expects an HTML document.
    pub fn accepts_html(&self) -> bool {
        self.accept
            .as_deref()
            .is_some_and(|accept| accept.contains("text/html"))
    }
}

#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl NetworkResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Transport to the upstream origin. Any HTTP status is a successful fetch
/// at this level; callers decide what counts as usable.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError>;
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("order endpoint answered {status}")]
    Rejected { status: StatusCode },
    #[error("order endpoint reported failure: {message}")]
    Refused { message: String },
}

/// The external order write endpoint.
#[async_trait]
pub trait OrderEndpoint: Send + Sync {
    async fn submit(&self, item: &OutboxItem) -> Result<(), DeliveryError>;
}
