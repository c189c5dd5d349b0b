//! Control routes under `/__outpost`: health, event stream, inbound
//! messages, the outbox and background-sync signals.

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::application::{
    error::HttpError,
    messages::{ClientMessage, RawMessage, Reply},
    notify::{Notification, ServerEvent},
};
use crate::domain::entities::OrderPayload;

use super::RouterState;

const SOURCE: &str = "infra::http::control";

pub const SYNC_TAG_ORDERS: &str = "send-orders";
pub const SYNC_TAG_MENU: &str = "update-menu";

pub(super) async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub(super) async fn not_found(uri: Uri) -> HttpError {
    HttpError::new(
        SOURCE,
        StatusCode::NOT_FOUND,
        "Unknown control route",
        format!("no control route at `{}`", uri.path()),
    )
}

/// Server-sent stream of outbound envelopes for one subscriber.
pub(super) async fn events(State(state): State<RouterState>) -> Response {
    let mut receiver = state.notifier.subscribe();
    let stream = stream! {
        loop {
            match receiver.recv().await {
                Ok(note) => {
                    let encoded = Event::default()
                        .event(note.event.kind())
                        .json_data(note.to_envelope());
                    match encoded {
                        Ok(event) => {
                            yield Ok::<Event, Infallible>(event);
                        }
                        Err(err) => {
                            warn!(kind = note.event.kind(), error = %err, "Dropping unencodable event");
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

pub(super) async fn message(
    State(state): State<RouterState>,
    Json(raw): Json<RawMessage>,
) -> Result<Response, HttpError> {
    let message = ClientMessage::try_from(raw)?;
    match state.messages.dispatch(message).await? {
        Reply::Accepted => Ok(StatusCode::ACCEPTED.into_response()),
        Reply::Status(report) => {
            let envelope = Notification::new(ServerEvent::StatusResponse(report)).to_envelope();
            Ok(Json(envelope).into_response())
        }
    }
}

pub(super) async fn enqueue_order(
    State(state): State<RouterState>,
    Json(payload): Json<OrderPayload>,
) -> Result<Response, HttpError> {
    let item = state.outbox.enqueue(payload).await?;
    if !state.sync.background_sync {
        state.outbox.schedule_drain(state.sync.fallback_delay);
    }
    Ok((StatusCode::CREATED, Json(item)).into_response())
}

pub(super) async fn list_orders(State(state): State<RouterState>) -> Result<Response, HttpError> {
    let items = state.outbox.list().await?;
    Ok(Json(items).into_response())
}

pub(super) async fn retry_order(
    State(state): State<RouterState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    let item = state.outbox.retry(&id).await?;
    Ok(Json(item).into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct SyncRequest {
    tag: String,
}

/// Background-sync signal.
pub(super) async fn sync(
    State(state): State<RouterState>,
    Json(request): Json<SyncRequest>,
) -> Result<Response, HttpError> {
    match request.tag.as_str() {
        SYNC_TAG_ORDERS => {
            let report = state.outbox.drain().await?;
            Ok(Json(report).into_response())
        }
        SYNC_TAG_MENU => {
            state
                .strategy
                .refresh_and_announce(state.sync.menu_url.clone())
                .await?;
            info!(url = %state.sync.menu_url, "Menu cache refreshed");
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        other => Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Unknown sync tag",
            format!("sync tag `{other}` is not recognised"),
        )),
    }
}
