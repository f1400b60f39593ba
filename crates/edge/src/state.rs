//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::EdgeConfig;
use crate::runtime::WorkerRuntime;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`; the runtime it wraps is built
/// once at startup.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<WorkerRuntime>,
}

impl AppState {
    #[must_use]
    pub fn new(runtime: WorkerRuntime) -> Self {
        Self {
            inner: Arc::new(runtime),
        }
    }

    /// Wrap a runtime that is already shared (e.g. with background tasks).
    #[must_use]
    pub const fn from_shared(runtime: Arc<WorkerRuntime>) -> Self {
        Self { inner: runtime }
    }

    /// Get a reference to the worker runtime.
    #[must_use]
    pub fn runtime(&self) -> &WorkerRuntime {
        &self.inner
    }

    /// The shared runtime handle.
    #[must_use]
    pub const fn shared(&self) -> &Arc<WorkerRuntime> {
        &self.inner
    }

    /// Get a reference to the edge configuration.
    #[must_use]
    pub fn config(&self) -> &EdgeConfig {
        self.inner.config()
    }

    /// Get a reference to the queue store connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        self.inner.pool()
    }
}
