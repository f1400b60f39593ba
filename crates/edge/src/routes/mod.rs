//! HTTP route handlers for the edge.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                          - Liveness check
//! GET  /health/ready                    - Readiness check (queue store)
//!
//! # Control surface
//! GET  /_edge/health                    - Lifecycle and connectivity
//! GET  /_edge/state                     - Caches and queue depths
//! POST /_edge/sync                      - Drain every queue
//! POST /_edge/sync/{tag}                - Drain one queue (sync-orders, ...)
//! POST /_edge/message                   - Host command (SKIP_WAITING, ...)
//! POST /_edge/connectivity              - Host connectivity hint
//! POST /_edge/push                      - Deliver a push payload
//! GET  /_edge/notifications             - Visible notifications
//! POST /_edge/notifications/click       - Notification click
//! GET  /_edge/clients                   - Registered windows
//! POST /_edge/clients                   - Register a window
//! DELETE /_edge/clients/{id}            - Forget a closed window
//! GET  /_edge/subscription              - Stored push subscription
//! PUT  /_edge/subscription              - Store a push subscription
//! DELETE /_edge/subscription            - Remove the push subscription
//! GET  /_edge/queue/{class}             - Pending entries
//! GET  /_edge/queue/{class}/dead-letters - Abandoned entries
//!
//! # Everything else
//! *    /*                               - Cache router / outbox
//! ```

pub mod edge;
pub mod proxy;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Create the control routes router.
pub fn edge_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(edge::health))
        .route("/state", get(edge::status))
        .route("/sync", post(edge::sync_all))
        .route("/sync/{tag}", post(edge::sync_tag))
        .route("/message", post(edge::message))
        .route("/connectivity", post(edge::connectivity))
        .route("/push", post(edge::push))
        .route("/notifications", get(edge::notifications))
        .route("/notifications/click", post(edge::notification_click))
        .route("/clients", get(edge::clients).post(edge::register_client))
        .route("/clients/{id}", delete(edge::unregister_client))
        .route(
            "/subscription",
            get(edge::subscription)
                .put(edge::save_subscription)
                .delete(edge::delete_subscription),
        )
        .route("/queue/{class}", get(edge::queue))
        .route("/queue/{class}/dead-letters", get(edge::dead_letters))
}

/// Create all routes for the edge.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/_edge", edge_routes())
        .fallback(proxy::proxy)
}

/// The full application: routes, request IDs and request tracing.
pub fn app(state: AppState) -> Router {
    routes()
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Verifies the queue store is reachable before returning OK.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1").fetch_one(state.pool()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
