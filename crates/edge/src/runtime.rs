//! The worker runtime: every component, built once and shared.
//!
//! # Background tasks
//!
//! - Install, retried every minute until it succeeds
//! - Connectivity probe of the upstream health endpoint
//! - Drain of every queue when connectivity returns
//! - Periodic drain of every queue while online

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use eatech_core::Connectivity;

use crate::cache::{CacheNames, CacheStorage};
use crate::config::EdgeConfig;
use crate::lifecycle::LifecycleManager;
use crate::net::{Fetcher, Upstream};
use crate::push::{ClientDirectory, NotificationCenter, PushGateway};
use crate::router::CacheRouter;
use crate::sync::{ConnectivityMonitor, Outbox, Submitter, SyncCoordinator};

/// Delay between install attempts after a failure.
pub const INSTALL_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// All edge components.
pub struct WorkerRuntime {
    config: EdgeConfig,
    pool: SqlitePool,
    storage: CacheStorage,
    upstream: Upstream,
    fetcher: Arc<dyn Fetcher>,
    connectivity: ConnectivityMonitor,
    router: CacheRouter,
    coordinator: SyncCoordinator,
    outbox: Outbox,
    push: PushGateway,
    notifications: Arc<NotificationCenter>,
    clients: Arc<ClientDirectory>,
    lifecycle: LifecycleManager,
}

impl WorkerRuntime {
    /// Wire every component against one pool and one fetcher.
    #[must_use]
    pub fn new(config: EdgeConfig, pool: SqlitePool, fetcher: Arc<dyn Fetcher>) -> Self {
        let storage = CacheStorage::persistent(pool.clone());
        let names = CacheNames::new(config.cache_version.clone());
        let upstream = Upstream::new(config.upstream_url.clone());
        let connectivity = ConnectivityMonitor::default();
        let notifications = Arc::new(NotificationCenter::new());
        let clients = Arc::new(ClientDirectory::new());

        let router = CacheRouter::new(
            storage.clone(),
            names.clone(),
            Arc::clone(&fetcher),
            upstream.clone(),
            connectivity.clone(),
            config.timeouts,
        );
        let submitter = Submitter::new(
            Arc::clone(&fetcher),
            upstream.clone(),
            config.api_token.clone(),
        );
        let coordinator = SyncCoordinator::new(
            pool.clone(),
            submitter.clone(),
            config.retry,
            connectivity.clone(),
            notifications.clone(),
        );
        let outbox = Outbox::new(
            pool.clone(),
            submitter,
            connectivity.clone(),
            config.timeouts.api,
        );
        let push = PushGateway::new(notifications.clone(), clients.clone());
        let lifecycle = LifecycleManager::new(
            storage.clone(),
            names,
            Arc::clone(&fetcher),
            upstream.clone(),
            clients.clone(),
        )
        .with_precache(config.precache.clone())
        .with_skip_waiting(config.skip_waiting);

        Self {
            config,
            pool,
            storage,
            upstream,
            fetcher,
            connectivity,
            router,
            coordinator,
            outbox,
            push,
            notifications,
            clients,
            lifecycle,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &EdgeConfig {
        &self.config
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub const fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    #[must_use]
    pub const fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    #[must_use]
    pub const fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    #[must_use]
    pub const fn router(&self) -> &CacheRouter {
        &self.router
    }

    #[must_use]
    pub const fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    #[must_use]
    pub const fn push(&self) -> &PushGateway {
        &self.push
    }

    #[must_use]
    pub const fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    #[must_use]
    pub const fn clients(&self) -> &Arc<ClientDirectory> {
        &self.clients
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Start the background tasks. They stop when the returned handle is
    /// shut down or dropped.
    #[must_use]
    pub fn spawn_background(self: &Arc<Self>) -> BackgroundTasks {
        // Subscribe before spawning so no transition is missed.
        let changes = self.connectivity.subscribe();
        BackgroundTasks {
            handles: vec![
                tokio::spawn(Arc::clone(self).install_until_ready()),
                tokio::spawn(Arc::clone(self).sync_on_reconnect(changes)),
                tokio::spawn(Arc::clone(self).probe_loop()),
                tokio::spawn(Arc::clone(self).periodic_sync()),
            ],
        }
    }

    async fn install_until_ready(self: Arc<Self>) {
        loop {
            match self.lifecycle.install().await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in = ?INSTALL_RETRY_INTERVAL,
                        "Install failed, serving without precache"
                    );
                    tokio::time::sleep(INSTALL_RETRY_INTERVAL).await;
                }
            }
        }
    }

    async fn sync_on_reconnect(self: Arc<Self>, mut changes: watch::Receiver<Connectivity>) {
        while changes.changed().await.is_ok() {
            let now = *changes.borrow_and_update();
            if now == Connectivity::Online {
                tracing::info!("Back online, draining queues");
                self.sync_all().await;
            }
        }
    }

    async fn probe_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.probe_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.connectivity
                .probe(self.fetcher.as_ref(), &self.upstream)
                .await;
        }
    }

    async fn periodic_sync(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.connectivity.is_online() {
                self.sync_all().await;
            }
        }
    }

    async fn sync_all(&self) {
        match self.coordinator.sync_all().await {
            Ok(reports) => {
                let delivered: usize = reports.iter().map(|r| r.delivered).sum();
                tracing::debug!(delivered, "Background sync finished");
            }
            Err(e) => {
                let event_id = sentry::capture_error(&e);
                tracing::error!(error = %e, sentry_event_id = %event_id, "Background sync failed");
            }
        }
    }
}

/// Handles of the running background tasks.
#[derive(Debug)]
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Stop every task.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.shutdown();
    }
}
