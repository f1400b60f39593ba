//! End-to-end tests for the EATECH edge.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p eatech-integration-tests
//! ```
//!
//! Every test drives the full axum application in-process against a
//! [`ScriptedFetcher`] upstream, so no network or external database is
//! needed.
//!
//! # Test Categories
//!
//! - `offline_orders` - Outbox, durable queue and background sync
//! - `cache_routing` - Strategy selection and offline fallbacks
//! - `lifecycle` - Install, activation and host commands
//! - `push` - Push delivery and notification clicks
//! - `durability` - Queue store persistence across restarts

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use serde_json::Value;
use sqlx::SqlitePool;
use tower::ServiceExt;
use url::Url;

use eatech_edge::config::EdgeConfig;
use eatech_edge::db::create_memory_pool;
use eatech_edge::routes;
use eatech_edge::runtime::WorkerRuntime;
use eatech_edge::state::AppState;
use eatech_edge::sync::RetryPolicy;
use eatech_edge::testing::ScriptedFetcher;

pub use eatech_edge::testing;

/// Origin of the scripted upstream.
pub const ORIGIN: &str = "https://api.eatech.test";

/// Absolute upstream URL for `path`.
#[must_use]
pub fn upstream(path: &str) -> String {
    format!("{ORIGIN}{path}")
}

/// A running edge application with a scripted upstream.
pub struct TestEdge {
    pub fetcher: Arc<ScriptedFetcher>,
    pub runtime: Arc<WorkerRuntime>,
    app: Router,
}

impl TestEdge {
    /// An edge on an in-memory queue store with default settings.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// An edge on an in-memory queue store, with `configure` applied to
    /// the default configuration.
    pub async fn with_config(configure: impl FnOnce(&mut EdgeConfig)) -> Self {
        let pool = create_memory_pool()
            .await
            .expect("in-memory queue store should open");
        let mut config = Self::config();
        configure(&mut config);
        Self::with_pool(config, pool)
    }

    /// An edge on an existing pool.
    #[must_use]
    pub fn with_pool(config: EdgeConfig, pool: SqlitePool) -> Self {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let runtime = Arc::new(WorkerRuntime::new(config, pool, fetcher.clone()));
        let app = routes::app(AppState::from_shared(Arc::clone(&runtime)));
        Self {
            fetcher,
            runtime,
            app,
        }
    }

    /// Default test configuration: cache version `v1`, immediate retries.
    #[must_use]
    pub fn config() -> EdgeConfig {
        let mut config =
            EdgeConfig::with_upstream(Url::parse(ORIGIN).expect("origin should be a valid URL"));
        config.cache_version = "v1".to_owned();
        config.retry = RetryPolicy::immediate();
        config
    }

    /// Send a request through the full application.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
    }

    /// A top-level navigation, as a browser would send it.
    pub async fn navigate(&self, uri: &str) -> TestResponse {
        self.send(
            Request::builder()
                .uri(uri)
                .header("sec-fetch-mode", "navigate")
                .header("sec-fetch-dest", "document")
                .header(header::ACCEPT, "text/html")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> TestResponse {
        self.send(json_request(Method::POST, uri, body)).await
    }

    pub async fn put_json(&self, uri: &str, body: &Value) -> TestResponse {
        self.send(json_request(Method::PUT, uri, body)).await
    }

    /// Tell the edge whether the host believes it is online.
    pub async fn set_online(&self, online: bool) {
        let response = self
            .post_json("/_edge/connectivity", &serde_json::json!({ "online": online }))
            .await;
        assert_eq!(response.status, StatusCode::OK);
    }
}

/// A JSON request with the given method.
#[must_use]
pub fn json_request(method: Method, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

/// A buffered response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    /// The body parsed as JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body should be JSON")
    }

    /// The body as UTF-8 text.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
