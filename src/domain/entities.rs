//! Core records shared by the cache and outbox layers.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use super::error::DomainError;
use super::types::OutboxStatus;

/// Canonical identity of a cacheable request.
///
/// Only the method and the absolute URL (without fragment) participate, so two
/// requests that differ only in headers resolve to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }

    /// Returns a key only for cacheable (GET) requests.
    pub fn for_request(method: &str, url: &Url) -> Option<Self> {
        method
            .eq_ignore_ascii_case("GET")
            .then(|| Self::get(url))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response body. Entries are replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: RequestKey,
    pub payload: Bytes,
    pub content_type: String,
    pub size: u64,
    pub inserted_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(key: RequestKey, payload: Bytes, content_type: impl Into<String>) -> Self {
        let size = payload.len() as u64;
        Self {
            key,
            payload,
            content_type: content_type.into(),
            size,
            inserted_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_inserted_at(mut self, inserted_at: OffsetDateTime) -> Self {
        self.inserted_at = inserted_at;
        self
    }
}

/// Order body as submitted by the foreground. Only `items` and `total` are
/// inspected; everything else is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A queued write awaiting delivery to the order endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxItem {
    pub id: String,
    pub payload: OrderPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    pub attempt_count: u32,
    pub status: OutboxStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_attempt_at: Option<OffsetDateTime>,
}

impl OutboxItem {
    pub fn new(payload: OrderPayload) -> Self {
        Self {
            id: format!("ord_{}", Uuid::new_v4().simple()),
            payload,
            enqueued_at: OffsetDateTime::now_utc(),
            attempt_count: 0,
            status: OutboxStatus::Pending,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// Pending and past its backoff deadline.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub fn begin_attempt(&mut self) -> Result<(), DomainError> {
        if self.status != OutboxStatus::Pending {
            return Err(DomainError::invalid_transition(
                &self.id,
                "start an attempt",
                self.status,
            ));
        }
        self.status = OutboxStatus::InFlight;
        Ok(())
    }

    pub fn mark_delivered(&mut self) -> Result<(), DomainError> {
        self.expect_in_flight("mark delivered")?;
        self.status = OutboxStatus::Delivered;
        self.last_error = None;
        self.next_attempt_at = None;
        Ok(())
    }

    /// Record a failed attempt. The item returns to `pending` with a retry
    /// deadline, or parks as `failed` once `max_attempts` is reached.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        max_attempts: u32,
        retry_at: OffsetDateTime,
    ) -> Result<OutboxStatus, DomainError> {
        self.expect_in_flight("record a failure")?;
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_error = Some(error.into());
        if self.attempt_count >= max_attempts {
            self.status = OutboxStatus::Failed;
            self.next_attempt_at = None;
        } else {
            self.status = OutboxStatus::Pending;
            self.next_attempt_at = Some(retry_at);
        }
        Ok(self.status)
    }

    /// Returns an item left `in_flight` by an interrupted drain to `pending`.
    pub fn recover_interrupted(&mut self) -> bool {
        if self.status == OutboxStatus::InFlight {
            self.status = OutboxStatus::Pending;
            true
        } else {
            false
        }
    }

    /// Puts a parked item back into rotation with a fresh retry budget.
    pub fn resubmit(&mut self) -> bool {
        if self.status == OutboxStatus::Failed {
            self.status = OutboxStatus::Pending;
            self.attempt_count = 0;
            self.next_attempt_at = None;
            true
        } else {
            false
        }
    }

    fn expect_in_flight(&self, action: &'static str) -> Result<(), DomainError> {
        if self.status == OutboxStatus::InFlight {
            Ok(())
        } else {
            Err(DomainError::invalid_transition(&self.id, action, self.status))
        }
    }
}
