//! Interception behaviour observed through the axum router.

mod support;

use axum::{body::Body, http::Request, http::StatusCode};
use outpost::cache::CacheStoreSet;
use serde_json::json;

use support::{get, harness, post_json, send};

fn navigate(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("accept", "text/html,application/xhtml+xml")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn precached_page_is_served_while_offline() {
    let h = harness(true).await;
    h.upstream.set_offline(true);

    let reply = send(&h.router, navigate("/")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("x-outpost-source"), "cache");
    assert_eq!(reply.header("x-outpost-class"), "static");
    assert_eq!(reply.text(), "<h1>Cafe</h1>");
    assert!(!reply.header("x-request-id").is_empty());
}

#[tokio::test]
async fn offline_navigation_falls_back_to_offline_document() {
    let h = harness(true).await;
    h.upstream.set_offline(true);

    let reply = send(&h.router, navigate("/about")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("x-outpost-source"), "fallback");
    assert_eq!(reply.text(), "<h1>Offline</h1>");
}

#[tokio::test]
async fn offline_asset_without_copy_is_unavailable() {
    let h = harness(true).await;
    h.upstream.set_offline(true);

    let reply = send(&h.router, get("/missing.css")).await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.text(), "Resource unavailable");
}

#[tokio::test]
async fn menu_is_served_from_cache_after_connection_drops() {
    let h = harness(true).await;

    let online = send(&h.router, get("/api/menu.json")).await;
    assert_eq!(online.status, StatusCode::OK);
    assert_eq!(online.header("x-outpost-source"), "network");
    assert_eq!(online.header("x-outpost-class"), "data");

    h.upstream.set_offline(true);
    let offline = send(&h.router, get("/api/menu.json")).await;
    assert_eq!(offline.status, StatusCode::OK);
    assert_eq!(offline.header("x-outpost-source"), "cache");
    assert_eq!(offline.json(), json!({ "items": ["espresso"] }));
}

#[tokio::test]
async fn uncached_data_offline_yields_structured_error() {
    let h = harness(true).await;
    h.upstream.set_offline(true);

    let reply = send(&h.router, get("/api/specials.json?day=mon")).await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.header("content-type"), "application/json");
    let body = reply.json();
    assert_eq!(body["error"], "offline");
    assert_eq!(body["url"], "http://cafe.test/api/specials.json?day=mon");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn offline_image_is_replaced_by_placeholder() {
    let h = harness(true).await;
    h.upstream.set_offline(true);

    let reply = send(&h.router, get("/img/latte.PNG")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-type"), "image/svg+xml");
    assert_eq!(reply.header("x-outpost-class"), "image");
    assert!(reply.text().starts_with("<svg"));
}

#[tokio::test]
async fn writes_pass_through_and_fail_structured_when_offline() {
    let h = harness(true).await;
    h.upstream.set_offline(true);

    let reply = send(
        &h.router,
        post_json("/api/feedback", json!({ "stars": 5 })),
    )
    .await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.json()["error"], "offline");
    assert!(h.stores.list_keys("outpost-data-v1").await.unwrap().is_empty());
}

#[tokio::test]
async fn scheme_relative_paths_are_rejected() {
    let h = harness(true).await;

    let reply = send(&h.router, get("//elsewhere.test/steal")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_unknown_control_routes() {
    let h = harness(true).await;

    assert_eq!(
        send(&h.router, get("/__outpost/health")).await.status,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        send(&h.router, get("/__outpost/nope")).await.status,
        StatusCode::NOT_FOUND
    );
}
