//! Cache router: one strategy per resource class.
//!
//! | Class      | Strategy                  | Cache     |
//! |------------|---------------------------|-----------|
//! | Payment    | network-only              | none      |
//! | Static     | cache-first               | `static`  |
//! | Image      | stale-while-revalidate    | `images`  |
//! | API        | network-first, 3 s        | `api`     |
//! | Navigation | network-first, 5 s        | `dynamic` |
//! | Other      | cache-first               | `dynamic` |
//!
//! Only `GET` is routed; other methods pass straight through. Only 2xx
//! responses are stored. Every path ends in a response: a network error is
//! answered from cache, a placeholder, the offline page, or a synthetic
//! offline JSON body, never surfaced as an error.

mod fallback;

pub use fallback::{
    BUILTIN_OFFLINE_PAGE, OFFLINE_PAGE_PATH, PLACEHOLDER_IMAGE_PATH, builtin_offline_page,
    not_found, offline_json,
};

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tracing::{debug, instrument};

use eatech_core::request::{CacheKind, CacheStrategy, ResourceClass};

use crate::cache::{CacheNames, CacheStorage, NamedCache, RequestKey};
use crate::net::{FetchError, FetchRequest, FetchResponse, Fetcher, Upstream};
use crate::sync::ConnectivityMonitor;

const API_OFFLINE_MESSAGE: &str =
    "You are offline and this data has not been cached yet. Please try again once connected.";
const NETWORK_REQUIRED_MESSAGE: &str = "This action requires a network connection.";

/// Deadlines for the network-first strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterTimeouts {
    pub api: Duration,
    pub navigation: Duration,
}

impl Default for RouterTimeouts {
    fn default() -> Self {
        Self {
            api: Duration::from_secs(3),
            navigation: Duration::from_secs(5),
        }
    }
}

/// Answers intercepted requests.
#[derive(Clone)]
pub struct CacheRouter {
    storage: CacheStorage,
    names: CacheNames,
    fetcher: Arc<dyn Fetcher>,
    upstream: Upstream,
    connectivity: ConnectivityMonitor,
    timeouts: RouterTimeouts,
}

impl CacheRouter {
    #[must_use]
    pub fn new(
        storage: CacheStorage,
        names: CacheNames,
        fetcher: Arc<dyn Fetcher>,
        upstream: Upstream,
        connectivity: ConnectivityMonitor,
        timeouts: RouterTimeouts,
    ) -> Self {
        Self {
            storage,
            names,
            fetcher,
            upstream,
            connectivity,
            timeouts,
        }
    }

    /// Answer a request.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: FetchRequest) -> FetchResponse {
        if request.method != Method::GET {
            return self.pass_through(request).await;
        }

        let class = ResourceClass::classify(&request.info());
        debug!(?class, strategy = ?class.strategy(), "Routing request");

        match (class.strategy(), class.cache_kind()) {
            (CacheStrategy::NetworkOnly, _) | (_, None) => self.network_only(request).await,
            (CacheStrategy::CacheFirst, Some(kind)) => self.cache_first(request, kind).await,
            (CacheStrategy::StaleWhileRevalidate, Some(kind)) => {
                self.stale_while_revalidate(request, kind).await
            }
            (CacheStrategy::NetworkFirst, Some(kind)) => {
                let timeout = if class == ResourceClass::Navigation {
                    self.timeouts.navigation
                } else {
                    self.timeouts.api
                };
                self.network_first(request, kind, timeout, class).await
            }
        }
    }

    /// The cache of the active version for `kind`.
    pub async fn cache(&self, kind: CacheKind) -> NamedCache {
        self.storage.open(&self.names.name(kind)).await
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let outcome = self.fetcher.fetch(request).await;
        self.connectivity.observe(&outcome);
        outcome
    }

    async fn pass_through(&self, request: FetchRequest) -> FetchResponse {
        match self.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Pass-through request failed");
                offline_json(NETWORK_REQUIRED_MESSAGE)
            }
        }
    }

    async fn network_only(&self, request: FetchRequest) -> FetchResponse {
        self.pass_through(request).await
    }

    async fn cache_first(&self, request: FetchRequest, kind: CacheKind) -> FetchResponse {
        let cache = self.cache(kind).await;
        let key = RequestKey::get(&request.url);
        if let Some(hit) = cache.get(&key).await {
            debug!("Cache hit");
            return hit;
        }

        match self.fetch(request).await {
            Ok(response) => {
                store_if_ok(&cache, key, &response).await;
                response
            }
            Err(e) => {
                debug!(error = %e, "Cache miss and network failed");
                not_found()
            }
        }
    }

    async fn stale_while_revalidate(&self, request: FetchRequest, kind: CacheKind) -> FetchResponse {
        let cache = self.cache(kind).await;
        let key = RequestKey::get(&request.url);

        if let Some(hit) = cache.get(&key).await {
            let fetcher = Arc::clone(&self.fetcher);
            let connectivity = self.connectivity.clone();
            tokio::spawn(async move {
                let outcome = fetcher.fetch(request).await;
                connectivity.observe(&outcome);
                match outcome {
                    Ok(response) => store_if_ok(&cache, key, &response).await,
                    Err(e) => debug!(error = %e, "Background revalidation failed"),
                }
            });
            return hit;
        }

        match self.fetch(request).await {
            Ok(response) => {
                store_if_ok(&cache, key, &response).await;
                response
            }
            Err(e) => {
                debug!(error = %e, "Image unavailable, serving placeholder");
                self.placeholder_image().await
            }
        }
    }

    async fn network_first(
        &self,
        request: FetchRequest,
        kind: CacheKind,
        timeout: Duration,
        class: ResourceClass,
    ) -> FetchResponse {
        let cache = self.cache(kind).await;
        let key = RequestKey::get(&request.url);

        // The fetch runs in its own task so a late response still refreshes
        // the cache after the deadline has passed.
        let fetch = {
            let fetcher = Arc::clone(&self.fetcher);
            let connectivity = self.connectivity.clone();
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let outcome = fetcher.fetch(request).await;
                connectivity.observe(&outcome);
                if let Ok(response) = &outcome {
                    store_if_ok(&cache, key, response).await;
                }
                outcome
            })
        };

        match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(Ok(response))) => return response,
            Ok(Ok(Err(e))) => debug!(error = %e, "Network failed, trying cache"),
            Ok(Err(e)) => debug!(error = %e, "Fetch task failed, trying cache"),
            Err(_) => debug!(?timeout, "Network timed out, trying cache"),
        }

        if let Some(hit) = cache.get(&key).await {
            return hit;
        }

        if class == ResourceClass::Navigation {
            self.offline_page().await
        } else {
            offline_json(API_OFFLINE_MESSAGE)
        }
    }

    async fn precached(&self, path: &str) -> Option<FetchResponse> {
        let url = self.upstream.url_for(path).ok()?;
        self.cache(CacheKind::Static)
            .await
            .get(&RequestKey::get(&url))
            .await
    }

    async fn placeholder_image(&self) -> FetchResponse {
        self.precached(PLACEHOLDER_IMAGE_PATH)
            .await
            .unwrap_or_else(not_found)
    }

    async fn offline_page(&self) -> FetchResponse {
        self.precached(OFFLINE_PAGE_PATH)
            .await
            .unwrap_or_else(builtin_offline_page)
    }
}

async fn store_if_ok(cache: &NamedCache, key: RequestKey, response: &FetchResponse) {
    if response.is_success() {
        cache.put(key, response.clone()).await;
    }
}
