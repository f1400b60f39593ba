//! Terminal responses used when neither network nor cache can answer.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use serde_json::json;

use crate::net::FetchResponse;

/// Offline page compiled into the binary, used until `/offline.html` is precached.
pub const BUILTIN_OFFLINE_PAGE: &str = include_str!("../../static/offline.html");

pub const PLACEHOLDER_IMAGE_PATH: &str = "/images/placeholder.png";
pub const OFFLINE_PAGE_PATH: &str = "/offline.html";

/// `{"error":"offline","message":…}` with 503.
#[must_use]
pub fn offline_json(message: &str) -> FetchResponse {
    FetchResponse::json(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({ "error": "offline", "message": message }),
    )
    .with_header(CACHE_CONTROL, HeaderValue::from_static("no-store"))
}

/// The built-in offline page.
#[must_use]
pub fn builtin_offline_page() -> FetchResponse {
    FetchResponse::new(StatusCode::SERVICE_UNAVAILABLE, BUILTIN_OFFLINE_PAGE)
        .with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        )
        .with_header(CACHE_CONTROL, HeaderValue::from_static("no-store"))
}

/// Empty 404, the answer to a cache-first miss that cannot be fetched.
#[must_use]
pub fn not_found() -> FetchResponse {
    FetchResponse::empty(StatusCode::NOT_FOUND)
}
