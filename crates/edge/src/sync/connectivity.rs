//! Upstream reachability as observed by the edge.

use std::sync::Arc;

use tokio::sync::watch;

use eatech_core::Connectivity;

use crate::net::{FetchError, FetchRequest, Fetcher, Upstream};

/// Path probed to check whether the upstream is reachable.
pub const HEALTH_PATH: &str = "/api/health";

/// Shared connectivity state.
///
/// Updated by the host, by fetch outcomes and by periodic probes. Subscribers
/// receive every change.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityMonitor {
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Set the state. Returns whether it changed.
    pub fn set(&self, next: Connectivity) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(connectivity = ?next, "Connectivity changed");
        }
        changed
    }

    /// Record the outcome of an upstream request.
    pub fn observe<T>(&self, outcome: &Result<T, FetchError>) {
        match outcome {
            Ok(_) => {
                self.set(Connectivity::Online);
            }
            Err(FetchError::Transport(_) | FetchError::Timeout) => {
                self.set(Connectivity::Offline);
            }
            Err(FetchError::InvalidUrl(_)) => {}
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Probe the upstream health endpoint and record the result.
    ///
    /// Any HTTP response counts as reachable.
    pub async fn probe(&self, fetcher: &dyn Fetcher, upstream: &Upstream) -> Connectivity {
        let outcome = match upstream.url_for(HEALTH_PATH) {
            Ok(url) => fetcher.fetch(FetchRequest::get(url)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            tracing::debug!(error = %e, "Upstream probe failed");
        }
        self.observe(&outcome);
        self.current()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Online)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_changes() {
        let monitor = ConnectivityMonitor::default();
        assert!(monitor.is_online());
        assert!(!monitor.set(Connectivity::Online));
        assert!(monitor.set(Connectivity::Offline));
        assert!(!monitor.is_online());
    }

    #[test]
    fn test_observe_fetch_outcomes() {
        let monitor = ConnectivityMonitor::default();
        monitor.observe::<()>(&Err(FetchError::Timeout));
        assert_eq!(monitor.current(), Connectivity::Offline);
        monitor.observe::<()>(&Err(FetchError::InvalidUrl("x".into())));
        assert_eq!(monitor.current(), Connectivity::Offline);
        monitor.observe(&Ok(()));
        assert_eq!(monitor.current(), Connectivity::Online);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let mut rx = monitor.subscribe();

        monitor.set(Connectivity::Online);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Online);
    }
}
