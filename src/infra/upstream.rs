//! HTTP adapters for the upstream origin, built on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde_json::Value;

use crate::application::network::{
    DeliveryError, Network, NetworkError, NetworkRequest, NetworkResponse, OrderEndpoint,
};
use crate::domain::entities::OutboxItem;

use super::error::InfraError;

/// Header carrying the outbox item id, so a retried delivery can be recognised.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

fn user_agent() -> &'static str {
    concat!("outpost/", env!("CARGO_PKG_VERSION"))
}

pub fn build_client(timeout: Duration) -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .map_err(|err| InfraError::http_client(err.to_string()))
}

fn map_reqwest_error(url: &Url, err: reqwest::Error) -> NetworkError {
    if err.is_timeout() {
        NetworkError::timeout(url)
    } else {
        NetworkError::transport(url, err.to_string())
    }
}

/// General network fetch used by the strategy executor.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: Client,
}

impl ReqwestNetwork {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: NetworkRequest) -> Result<NetworkResponse, NetworkError> {
        let url = request.url.clone();
        let mut builder = self.client.request(request.method, url.clone());
        if let Some(accept) = request.accept {
            builder = builder.header(ACCEPT, accept);
        }
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| map_reqwest_error(&url, err))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(&url, err))?;

        Ok(NetworkResponse {
            status,
            content_type,
            body,
        })
    }
}

/// The order write endpoint on the upstream origin.
#[derive(Debug, Clone)]
pub struct HttpOrderEndpoint {
    client: Client,
    url: Url,
}

impl HttpOrderEndpoint {
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl OrderEndpoint for HttpOrderEndpoint {
    async fn submit(&self, item: &OutboxItem) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(IDEMPOTENCY_HEADER, item.id.as_str())
            .json(&item.payload)
            .send()
            .await
            .map_err(|err| map_reqwest_error(&self.url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Rejected { status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(&self.url, err))?;
        refusal(&body).map_or(Ok(()), |message| Err(DeliveryError::Refused { message }))
    }
}

/// A 2xx body of `{"success": false, ...}` is still a refusal.
fn refusal(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    if value.get("success").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    Some(
        value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("order rejected")
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_false_is_a_refusal() {
        assert_eq!(
            refusal(br#"{"success": false, "message": "empty order"}"#),
            Some("empty order".to_string())
        );
        assert_eq!(
            refusal(br#"{"success": false}"#),
            Some("order rejected".to_string())
        );
    }

    #[test]
    fn other_bodies_are_accepted() {
        assert_eq!(refusal(br#"{"success": true}"#), None);
        assert_eq!(refusal(b"accepted"), None);
        assert_eq!(refusal(b""), None);
    }

    #[tokio::test]
    async fn unreachable_origin_is_a_transport_error() {
        let client = build_client(Duration::from_secs(2)).unwrap();
        let network = ReqwestNetwork::new(client);
        let url = Url::parse("http://127.0.0.1:9/").unwrap();

        let result = network.fetch(NetworkRequest::get(url)).await;
        assert!(matches!(
            result,
            Err(NetworkError::Transport { .. } | NetworkError::Timeout { .. })
        ));
    }
}
