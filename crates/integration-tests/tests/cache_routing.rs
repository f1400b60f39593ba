//! Integration tests for request routing through the cache.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use eatech_edge::lifecycle::DEFAULT_PRECACHE;
use eatech_edge::net::FetchError;
use eatech_integration_tests::{TestEdge, upstream};

// =============================================================================
// API (network-first)
// =============================================================================

#[tokio::test]
async fn test_slow_api_falls_back_to_cached_response() {
    let edge = TestEdge::with_config(|config| {
        config.timeouts.api = Duration::from_millis(50);
    })
    .await;

    let menu = upstream("/api/menu/pizzeria-roma");
    edge.fetcher.respond(&menu, StatusCode::OK, r#"{"items":3}"#);
    let fresh = edge.get("/api/menu/pizzeria-roma").await;
    assert_eq!(fresh.status, StatusCode::OK);
    assert_eq!(fresh.json(), json!({ "items": 3 }));

    edge.fetcher
        .respond_with_delay(&menu, StatusCode::OK, Duration::from_secs(5));
    let fallback = edge.get("/api/menu/pizzeria-roma").await;
    assert_eq!(fallback.status, StatusCode::OK);
    assert_eq!(fallback.json(), json!({ "items": 3 }));
}

#[tokio::test]
async fn test_uncached_api_offline_returns_json_error() {
    let edge = TestEdge::new().await;
    edge.fetcher.set_offline(true);

    let response = edge.get("/api/products/margherita").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json()["error"], "offline");
}

#[tokio::test]
async fn test_api_error_response_is_not_cached() {
    let edge = TestEdge::new().await;
    let tenant = upstream("/api/tenant/roma");

    edge.fetcher
        .respond(&tenant, StatusCode::INTERNAL_SERVER_ERROR, "boom");
    assert_eq!(
        edge.get("/api/tenant/roma").await.status,
        StatusCode::INTERNAL_SERVER_ERROR
    );

    edge.fetcher.fail(&tenant, FetchError::Timeout);
    let response = edge.get("/api/tenant/roma").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// Payment (network-only)
// =============================================================================

#[tokio::test]
async fn test_payment_requests_are_never_cached() {
    let edge = TestEdge::new().await;
    let intent = upstream("/api/payments/intent");
    edge.fetcher.respond(&intent, StatusCode::OK, r#"{"secret":"pi_1"}"#);

    assert_eq!(edge.get("/api/payments/intent").await.status, StatusCode::OK);
    assert_eq!(edge.get("/api/payments/intent").await.status, StatusCode::OK);
    assert_eq!(edge.fetcher.hits(&intent), 2);

    edge.fetcher.set_offline(true);
    let offline = edge.get("/api/payments/intent").await;
    assert_eq!(offline.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(offline.json()["error"], "offline");
}

// =============================================================================
// Static assets and images
// =============================================================================

#[tokio::test]
async fn test_static_asset_is_served_from_cache() {
    let edge = TestEdge::new().await;
    let script = upstream("/_next/static/chunks/app.js");
    edge.fetcher.respond(&script, StatusCode::OK, "console.log(1)");

    assert_eq!(edge.get("/_next/static/chunks/app.js").await.text(), "console.log(1)");
    edge.fetcher.set_offline(true);
    assert_eq!(edge.get("/_next/static/chunks/app.js").await.text(), "console.log(1)");
    assert_eq!(edge.fetcher.hits(&script), 1);
}

#[tokio::test]
async fn test_missing_image_offline_gets_placeholder() {
    let edge = TestEdge::new().await;
    for path in DEFAULT_PRECACHE {
        edge.fetcher.respond(&upstream(path), StatusCode::OK, format!("precached {path}"));
    }
    edge.runtime.lifecycle().install().await.unwrap();

    edge.fetcher.set_offline(true);
    let response = edge.get("/uploads/margherita.webp").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "precached /images/placeholder.png");
}

// =============================================================================
// Navigation
// =============================================================================

#[tokio::test]
async fn test_offline_navigation_serves_precached_offline_page() {
    let edge = TestEdge::new().await;
    for path in DEFAULT_PRECACHE {
        edge.fetcher.respond(&upstream(path), StatusCode::OK, format!("precached {path}"));
    }
    edge.runtime.lifecycle().install().await.unwrap();

    edge.fetcher.set_offline(true);
    let response = edge.navigate("/orders/42").await;
    assert_eq!(response.text(), "precached /offline.html");
}

#[tokio::test]
async fn test_offline_navigation_without_install_serves_builtin_page() {
    let edge = TestEdge::new().await;
    edge.fetcher.set_offline(true);

    let response = edge.navigate("/orders/42").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(
        response
            .headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html")
    );
}

#[tokio::test]
async fn test_visited_page_is_served_offline() {
    let edge = TestEdge::new().await;
    edge.fetcher
        .respond(&upstream("/orders/42"), StatusCode::OK, "<h1>Order 42</h1>");

    assert_eq!(edge.navigate("/orders/42").await.text(), "<h1>Order 42</h1>");
    edge.fetcher.set_offline(true);
    assert_eq!(edge.navigate("/orders/42").await.text(), "<h1>Order 42</h1>");
}
