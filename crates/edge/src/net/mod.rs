//! Network access for the edge.
//!
//! # Architecture
//!
//! Everything that leaves the device goes through the [`Fetcher`] trait. The
//! production implementation is [`HttpFetcher`] (reqwest); tests swap in a
//! scripted fetcher so cache and sync behaviour can be exercised with the
//! network "unplugged".
//!
//! Requests and responses reuse the `http` types that axum and reqwest share,
//! so a response fetched upstream can be cached and replayed to the browser
//! without conversion.

mod http;

pub use self::http::HttpFetcher;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use eatech_core::request::{RequestDestination, RequestInfo, RequestMode};
use thiserror::Error;
use url::Url;

/// Errors returned by a [`Fetcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The upstream could not be reached (DNS, connect, reset, TLS).
    #[error("network error: {0}")]
    Transport(String),

    /// No response arrived within the allotted time.
    #[error("request timed out")]
    Timeout,

    /// The URL could not be built from the upstream origin.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Something that can perform an HTTP request.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform `request`. Any HTTP status is `Ok`; only transport failures are `Err`.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub destination: RequestDestination,
    pub mode: RequestMode,
}

impl FetchRequest {
    /// A plain `GET`.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            destination: RequestDestination::Empty,
            mode: RequestMode::Cors,
        }
    }

    /// A `POST` with a JSON body.
    #[must_use]
    pub fn post_json(url: Url, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            url,
            headers,
            body: body.into(),
            destination: RequestDestination::Empty,
            mode: RequestMode::Cors,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub const fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Classification view of this request.
    #[must_use]
    pub fn info(&self) -> RequestInfo<'_> {
        let accepts_html = self
            .headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));

        RequestInfo {
            host: self.url.host_str().unwrap_or_default(),
            path: self.url.path(),
            destination: self.destination,
            mode: self.mode,
            accepts_html,
        }
    }
}

/// A complete response, body buffered.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchResponse {
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// An empty-bodied response, e.g. the 404 of a cache-first miss.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, Bytes::new())
    }

    /// A JSON response.
    #[must_use]
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl IntoResponse for FetchResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// The backend origin the edge fronts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    base: Url,
}

impl Upstream {
    #[must_use]
    pub const fn new(base: Url) -> Self {
        Self { base }
    }

    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    /// Resolve a path (with optional query) against the origin.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`] if the result is not a valid URL.
    pub fn url_for(&self, path_and_query: &str) -> Result<Url, FetchError> {
        self.base
            .join(path_and_query)
            .map_err(|e| FetchError::InvalidUrl(format!("{path_and_query}: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_url_for() {
        let upstream = Upstream::new(Url::parse("https://api.eatech.ch").unwrap());
        let url = upstream.url_for("/api/menu?tenant=zuri").unwrap();
        assert_eq!(url.as_str(), "https://api.eatech.ch/api/menu?tenant=zuri");
    }

    #[test]
    fn test_info_reads_accept_header() {
        let request = FetchRequest::get(Url::parse("https://app.eatech.ch/about").unwrap())
            .with_header(ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
        let info = request.info();
        assert!(info.accepts_html);
        assert_eq!(info.path, "/about");
        assert_eq!(info.host, "app.eatech.ch");
    }

    #[test]
    fn test_json_response() {
        let response = FetchResponse::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({"error": "offline"}),
        );
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(!response.is_success());
    }
}
