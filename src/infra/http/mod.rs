//! The interception surface: a catch-all proxy plus the `/__outpost` control routes.

mod control;
mod middleware;
mod proxy;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use url::Url;

use crate::application::{
    messages::MessageRouter, notify::Notifier, outbox::OutboxQueue, strategy::StrategyExecutor,
};

pub use middleware::RequestContext;

/// Prefix reserved for control routes; everything else is intercepted.
pub const CONTROL_PREFIX: &str = "/__outpost";

/// Response header naming where a body came from.
pub const SOURCE_HEADER: &str = "x-outpost-source";
/// Response header naming the resource class of the request.
pub const CLASS_HEADER: &str = "x-outpost-class";

/// How the sync signal endpoints behave.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// When false, each enqueue schedules its own drain after `fallback_delay`.
    pub background_sync: bool,
    pub fallback_delay: Duration,
    /// Resource refreshed by the `update-menu` tag.
    pub menu_url: Url,
}

#[derive(Clone)]
pub struct RouterState {
    pub strategy: Arc<StrategyExecutor>,
    pub messages: Arc<MessageRouter>,
    pub outbox: Arc<OutboxQueue>,
    pub notifier: Notifier,
    pub sync: SyncOptions,
}

pub fn build_router(state: RouterState) -> Router {
    let control = Router::new()
        .route("/health", get(control::health))
        .route("/events", get(control::events))
        .route("/messages", post(control::message))
        .route("/orders", get(control::list_orders).post(control::enqueue_order))
        .route("/orders/{id}/retry", post(control::retry_order))
        .route("/sync", post(control::sync))
        .fallback(control::not_found);

    Router::new()
        .nest(CONTROL_PREFIX, control)
        .fallback(proxy::intercept)
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
