//! Install and activation of a cache version, and host commands.
//!
//! A version first installs (opens its caches and precaches the app shell),
//! then activates (evicts every other version's caches and claims the open
//! clients). A failed install leaves the version `redundant`; the binary
//! retries it in the background.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use url::Url;

use eatech_core::request::{CacheKind, ResourceClass};
use eatech_core::{HostCommand, WorkerState};

use crate::cache::{CacheNames, CacheStorage, RequestKey};
use crate::net::{FetchRequest, FetchResponse, Fetcher, Upstream};
use crate::push::ClientRegistry;

/// App shell fetched into the static cache on install.
pub const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/offline.html",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/images/placeholder.png",
];

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot precache {url}: {reason}")]
    Precache { url: String, reason: String },

    #[error("cannot move from {from} to {to}")]
    IllegalTransition { from: WorkerState, to: WorkerState },
}

/// Result of an activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub deleted_caches: Vec<String>,
    pub claimed_clients: usize,
}

/// What a host command did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// `SKIP_WAITING`: the state after the command.
    SkipWaiting { state: WorkerState },
    /// `CLEAR_CACHE`: the caches that were deleted.
    Cleared { caches: Vec<String> },
    /// `CACHE_URLS`: per-URL tallies.
    Cached {
        cached: usize,
        skipped: usize,
        failed: usize,
    },
}

/// Drives the install/activate state machine for one cache version.
pub struct LifecycleManager {
    storage: CacheStorage,
    names: CacheNames,
    fetcher: Arc<dyn Fetcher>,
    upstream: Upstream,
    clients: Arc<dyn ClientRegistry>,
    precache: Vec<String>,
    skip_waiting: AtomicBool,
    state: Mutex<WorkerState>,
    /// Serializes install and activation.
    steps: tokio::sync::Mutex<()>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(
        storage: CacheStorage,
        names: CacheNames,
        fetcher: Arc<dyn Fetcher>,
        upstream: Upstream,
        clients: Arc<dyn ClientRegistry>,
    ) -> Self {
        Self {
            storage,
            names,
            fetcher,
            upstream,
            clients,
            precache: DEFAULT_PRECACHE.iter().map(ToString::to_string).collect(),
            skip_waiting: AtomicBool::new(true),
            state: Mutex::new(WorkerState::Installing),
            steps: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the precache manifest.
    #[must_use]
    pub fn with_precache(mut self, paths: Vec<String>) -> Self {
        self.precache = paths;
        self
    }

    /// Whether a successful install activates without waiting for a host command.
    #[must_use]
    pub fn with_skip_waiting(self, skip_waiting: bool) -> Self {
        self.skip_waiting.store(skip_waiting, Ordering::SeqCst);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    #[must_use]
    pub fn names(&self) -> &CacheNames {
        &self.names
    }

    #[must_use]
    pub fn precache(&self) -> &[String] {
        &self.precache
    }

    fn transition(&self, next: WorkerState) -> Result<(), LifecycleError> {
        let mut state = self.lock_state();
        if !state.can_transition_to(next) {
            return Err(LifecycleError::IllegalTransition {
                from: *state,
                to: next,
            });
        }
        tracing::info!(from = %*state, to = %next, version = self.names.version(), "Lifecycle transition");
        *state = next;
        Ok(())
    }

    /// Open this version's caches and precache the app shell.
    ///
    /// Installing an already installed or active version is a no-op. With
    /// skip-waiting set, a successful install activates immediately.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::Precache` if any manifest URL can neither be
    /// fetched with a 2xx nor found in this version's static cache; the
    /// version is then `redundant` and nothing was stored.
    #[instrument(skip(self), fields(version = self.names.version()))]
    pub async fn install(&self) -> Result<(), LifecycleError> {
        {
            let _step = self.steps.lock().await;
            match self.state() {
                WorkerState::Installing => {}
                WorkerState::Redundant => self.transition(WorkerState::Installing)?,
                WorkerState::Installed | WorkerState::Activating | WorkerState::Activated => {
                    return Ok(());
                }
            }

            for kind in CacheKind::ALL {
                self.storage.open(&self.names.name(kind)).await;
            }

            let shell = match self.fetch_precache().await {
                Ok(shell) => shell,
                Err(e) => {
                    tracing::error!(error = %e, "Install failed");
                    self.transition(WorkerState::Redundant)?;
                    return Err(e);
                }
            };

            let cache = self.storage.open(&self.names.name(CacheKind::Static)).await;
            for (url, response) in shell {
                cache.put(RequestKey::get(&url), response).await;
            }
            self.transition(WorkerState::Installed)?;
        }

        if self.skip_waiting.load(Ordering::SeqCst) {
            self.activate().await?;
        }
        Ok(())
    }

    /// Fetch every manifest URL. All or nothing, except that a URL whose
    /// fetch fails but which this version already holds keeps its stored copy.
    async fn fetch_precache(&self) -> Result<Vec<(Url, FetchResponse)>, LifecycleError> {
        let cache = self.storage.open(&self.names.name(CacheKind::Static)).await;
        let mut shell = Vec::with_capacity(self.precache.len());
        for path in &self.precache {
            let failed = |reason: String| LifecycleError::Precache {
                url: path.clone(),
                reason,
            };
            let url = self.resolve(path).map_err(|e| failed(e.to_string()))?;
            let reason = match self.fetcher.fetch(FetchRequest::get(url.clone())).await {
                Ok(response) if response.is_success() => {
                    shell.push((url, response));
                    continue;
                }
                Ok(response) => format!("upstream answered {}", response.status),
                Err(e) => e.to_string(),
            };

            if cache.get(&RequestKey::get(&url)).await.is_some() {
                tracing::info!(url = %path, %reason, "Keeping stored precache copy");
                continue;
            }
            return Err(failed(reason));
        }
        Ok(shell)
    }

    /// Evict other versions' caches and claim every client.
    ///
    /// # Errors
    ///
    /// Returns `LifecycleError::IllegalTransition` unless the version is
    /// `installed`.
    #[instrument(skip(self), fields(version = self.names.version()))]
    pub async fn activate(&self) -> Result<Activation, LifecycleError> {
        let _step = self.steps.lock().await;
        self.transition(WorkerState::Activating)?;

        let mut deleted_caches = Vec::new();
        for name in self.storage.keys().await {
            if self.names.is_stale(&name) && self.storage.delete(&name).await {
                deleted_caches.push(name);
            }
        }
        let claimed_clients = self.clients.claim();

        self.transition(WorkerState::Activated)?;
        tracing::info!(
            deleted = deleted_caches.len(),
            claimed = claimed_clients,
            "Activated"
        );
        Ok(Activation {
            deleted_caches,
            claimed_clients,
        })
    }

    /// Activate without waiting. Before install completes this only sets the
    /// flag, so install activates on its own.
    ///
    /// # Errors
    ///
    /// Propagates activation errors.
    pub async fn skip_waiting(&self) -> Result<WorkerState, LifecycleError> {
        self.skip_waiting.store(true, Ordering::SeqCst);
        if self.state() == WorkerState::Installed {
            self.activate().await?;
        }
        Ok(self.state())
    }

    /// Handle a host-to-worker command.
    ///
    /// # Errors
    ///
    /// Only `SKIP_WAITING` can fail, with an activation error.
    #[instrument(skip(self))]
    pub async fn handle_command(&self, command: HostCommand) -> Result<CommandOutcome, LifecycleError> {
        match command {
            HostCommand::SkipWaiting => Ok(CommandOutcome::SkipWaiting {
                state: self.skip_waiting().await?,
            }),
            HostCommand::ClearCache => Ok(CommandOutcome::Cleared {
                caches: self.clear_caches().await,
            }),
            HostCommand::CacheUrls { urls } => Ok(self.cache_urls(&urls).await),
        }
    }

    /// Delete every cache owned by the edge, of any version.
    pub async fn clear_caches(&self) -> Vec<String> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if CacheNames::is_owned(&name) && self.storage.delete(&name).await {
                deleted.push(name);
            }
        }
        tracing::info!(deleted = deleted.len(), "Cleared caches");
        deleted
    }

    /// Fetch URLs into the cache their class selects. Payment URLs are skipped.
    async fn cache_urls(&self, urls: &[String]) -> CommandOutcome {
        let (mut cached, mut skipped, mut failed) = (0, 0, 0);

        for raw in urls {
            let Ok(url) = self.resolve(raw) else {
                tracing::warn!(url = %raw, "Cannot resolve URL to cache");
                failed += 1;
                continue;
            };
            let request = FetchRequest::get(url.clone());
            let Some(kind) = ResourceClass::classify(&request.info()).cache_kind() else {
                skipped += 1;
                continue;
            };

            match self.fetcher.fetch(request).await {
                Ok(response) if response.is_success() => {
                    self.storage
                        .open(&self.names.name(kind))
                        .await
                        .put(RequestKey::get(&url), response)
                        .await;
                    cached += 1;
                }
                Ok(response) => {
                    tracing::warn!(%url, status = %response.status, "Not caching non-2xx response");
                    failed += 1;
                }
                Err(e) => {
                    tracing::warn!(%url, error = %e, "Failed to fetch URL to cache");
                    failed += 1;
                }
            }
        }

        CommandOutcome::Cached {
            cached,
            skipped,
            failed,
        }
    }

    /// Absolute URLs are kept; paths resolve against the upstream.
    fn resolve(&self, raw: &str) -> Result<Url, crate::net::FetchError> {
        Url::parse(raw).or_else(|_| self.upstream.url_for(raw))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::db::create_memory_pool;
    use crate::push::ClientDirectory;
    use crate::testing::ScriptedFetcher;

    const ORIGIN: &str = "https://app.eatech.test";

    fn url(path: &str) -> String {
        format!("{ORIGIN}{path}")
    }

    fn shell(fetcher: &ScriptedFetcher) {
        for path in DEFAULT_PRECACHE {
            fetcher.respond(&url(path), StatusCode::OK, format!("body of {path}"));
        }
    }

    fn manager(
        storage: &CacheStorage,
        version: &str,
        fetcher: Arc<ScriptedFetcher>,
        clients: Arc<ClientDirectory>,
    ) -> LifecycleManager {
        LifecycleManager::new(
            storage.clone(),
            CacheNames::new(version),
            fetcher,
            Upstream::new(Url::parse(ORIGIN).unwrap()),
            clients,
        )
    }

    #[tokio::test]
    async fn test_install_precaches_and_activates() {
        let storage = CacheStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        shell(&fetcher);
        let clients = Arc::new(ClientDirectory::new());
        clients.register(None, "/");

        let lifecycle = manager(&storage, "v1", fetcher, clients.clone());
        lifecycle.install().await.unwrap();

        assert_eq!(lifecycle.state(), WorkerState::Activated);
        assert_eq!(storage.keys().await.len(), 4);
        let offline = storage
            .open("eatech-static-v1")
            .await
            .get(&RequestKey::get(&Url::parse(&url("/offline.html")).unwrap()))
            .await
            .unwrap();
        assert_eq!(offline.body.as_ref(), b"body of /offline.html");
        assert!(clients.list().iter().all(|c| c.controlled));
    }

    #[tokio::test]
    async fn test_install_failure_is_redundant_then_retry_succeeds() {
        let storage = CacheStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        shell(&fetcher);
        fetcher.respond(&url("/manifest.json"), StatusCode::NOT_FOUND, "");

        let lifecycle = manager(&storage, "v1", fetcher.clone(), Arc::new(ClientDirectory::new()));
        let err = lifecycle.install().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Precache { ref url, .. } if url == "/manifest.json"));
        assert_eq!(lifecycle.state(), WorkerState::Redundant);
        assert!(storage.open("eatech-static-v1").await.is_empty().await);

        fetcher.respond(&url("/manifest.json"), StatusCode::OK, "{}");
        lifecycle.install().await.unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_reinstall_offline_keeps_persisted_shell() {
        let pool = create_memory_pool().await.unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        shell(&fetcher);
        manager(
            &CacheStorage::persistent(pool.clone()),
            "v1",
            fetcher,
            Arc::new(ClientDirectory::new()),
        )
        .install()
        .await
        .unwrap();

        // Restart with no network
        let offline = Arc::new(ScriptedFetcher::new());
        offline.set_offline(true);
        let storage = CacheStorage::persistent(pool);
        let lifecycle = manager(&storage, "v1", offline, Arc::new(ClientDirectory::new()));
        lifecycle.install().await.unwrap();

        assert_eq!(lifecycle.state(), WorkerState::Activated);
        let page = storage
            .open("eatech-static-v1")
            .await
            .get(&RequestKey::get(&Url::parse(&url("/offline.html")).unwrap()))
            .await
            .unwrap();
        assert_eq!(page.body.as_ref(), b"body of /offline.html");
    }

    #[tokio::test]
    async fn test_install_offline_without_stored_shell_fails() {
        let pool = create_memory_pool().await.unwrap();
        let offline = Arc::new(ScriptedFetcher::new());
        offline.set_offline(true);
        let lifecycle = manager(
            &CacheStorage::persistent(pool),
            "v2",
            offline,
            Arc::new(ClientDirectory::new()),
        );

        assert!(lifecycle.install().await.is_err());
        assert_eq!(lifecycle.state(), WorkerState::Redundant);
    }

    #[tokio::test]
    async fn test_activation_evicts_previous_version() {
        let storage = CacheStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        shell(&fetcher);
        let clients = Arc::new(ClientDirectory::new());

        manager(&storage, "v1", fetcher.clone(), clients.clone())
            .install()
            .await
            .unwrap();
        storage.open("third-party-cache").await;

        let next = manager(&storage, "v2", fetcher, clients);
        next.install().await.unwrap();

        let names = storage.keys().await;
        assert!(names.iter().all(|n| !n.ends_with("-v1")), "{names:?}");
        assert!(names.contains(&"eatech-api-v2".to_string()));
        assert!(names.contains(&"third-party-cache".to_string()));
    }

    #[tokio::test]
    async fn test_waiting_version_activates_on_skip_waiting() {
        let storage = CacheStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        shell(&fetcher);
        let lifecycle = manager(&storage, "v1", fetcher, Arc::new(ClientDirectory::new()))
            .with_skip_waiting(false);

        lifecycle.install().await.unwrap();
        assert_eq!(lifecycle.state(), WorkerState::Installed);

        let outcome = lifecycle
            .handle_command(HostCommand::SkipWaiting)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::SkipWaiting {
                state: WorkerState::Activated
            }
        );
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let storage = CacheStorage::new();
        let lifecycle = manager(
            &storage,
            "v1",
            Arc::new(ScriptedFetcher::new()),
            Arc::new(ClientDirectory::new()),
        );
        assert!(matches!(
            lifecycle.activate().await,
            Err(LifecycleError::IllegalTransition {
                from: WorkerState::Installing,
                to: WorkerState::Activating
            })
        ));
    }

    #[tokio::test]
    async fn test_clear_cache_deletes_owned_caches_only() {
        let storage = CacheStorage::new();
        storage.open("eatech-static-v1").await;
        storage.open("eatech-api-v0").await;
        storage.open("other").await;
        let lifecycle = manager(
            &storage,
            "v1",
            Arc::new(ScriptedFetcher::new()),
            Arc::new(ClientDirectory::new()),
        );

        let outcome = lifecycle.handle_command(HostCommand::ClearCache).await.unwrap();
        assert_eq!(
            outcome,
            CommandOutcome::Cleared {
                caches: vec!["eatech-api-v0".to_string(), "eatech-static-v1".to_string()]
            }
        );
        assert_eq!(storage.keys().await, vec!["other".to_string()]);
    }

    #[tokio::test]
    async fn test_cache_urls_skips_payment() {
        let storage = CacheStorage::new();
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(&url("/api/menu"), StatusCode::OK, "menu");
        fetcher.respond(&url("/api/payments/intent"), StatusCode::OK, "secret");
        let lifecycle = manager(&storage, "v1", fetcher.clone(), Arc::new(ClientDirectory::new()));

        let outcome = lifecycle
            .handle_command(HostCommand::CacheUrls {
                urls: vec![
                    "/api/menu".to_string(),
                    "/api/payments/intent".to_string(),
                    "/api/missing".to_string(),
                ],
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommandOutcome::Cached {
                cached: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(fetcher.hits(&url("/api/payments/intent")), 0);
        let menu = storage
            .open("eatech-api-v1")
            .await
            .get(&RequestKey::get(&Url::parse(&url("/api/menu")).unwrap()))
            .await;
        assert!(menu.is_some());
    }
}
