//! `reqwest`-backed [`Fetcher`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header};
use tracing::{debug, instrument};

use super::{FetchError, FetchRequest, FetchResponse, Fetcher};

/// Headers that describe a single hop and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// Upstream HTTP client.
///
/// Cheap to clone. Requests have a 5 s connect timeout and a 30 s overall
/// ceiling; the cache router and outbox apply their own, shorter deadlines.
#[derive(Clone)]
pub struct HttpFetcher {
    inner: Arc<HttpFetcherInner>,
}

struct HttpFetcherInner {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Transport`] if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("eatech-edge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(HttpFetcherInner { client }),
        })
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);

        let response = self
            .inner
            .client
            .request(request.method, request.url)
            .headers(headers)
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await?;

        debug!(status = %status, bytes = body.len(), "Upstream response");

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};
    use url::Url;
    use wiremock::matchers::{body_string, header as header_matcher, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_fetch_returns_status_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/menu"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-menu-version", "7")
                    .set_body_string(r#"{"items":[]}"#),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/api/menu", server.uri())).unwrap();
        let response = fetcher.fetch(FetchRequest::get(url)).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.headers.get("x-menu-version").unwrap(), "7");
        assert_eq!(response.body.as_ref(), br#"{"items":[]}"#);
    }

    #[tokio::test]
    async fn test_fetch_forwards_body_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/orders"))
            .and(header_matcher("idempotency-key", "entry-1"))
            .and(body_string(r#"{"a":1}"#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&format!("{}/api/orders", server.uri())).unwrap();
        let request = FetchRequest::post_json(url, r#"{"a":1}"#)
            .with_header(
                HeaderName::from_static("idempotency-key"),
                HeaderValue::from_static("entry-1"),
            );
        let response = fetcher.fetch(request).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let response = fetcher.fetch(FetchRequest::get(url)).await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let fetcher = HttpFetcher::new().unwrap();
        // Port 9 (discard) on localhost is closed in test environments.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = fetcher.fetch(FetchRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_) | FetchError::Timeout));
    }
}
