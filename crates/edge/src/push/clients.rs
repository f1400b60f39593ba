//! Application windows ("clients") the edge can focus or open.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use url::Url;

use eatech_core::ClientId;

/// A registered application window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ClientId,
    pub url: String,
    pub focused: bool,
    /// Whether the active worker version controls this client.
    pub controlled: bool,
}

/// Finds, focuses and opens application windows.
pub trait ClientRegistry: Send + Sync {
    /// A client currently showing `url`, if any.
    fn find_by_url(&self, url: &str) -> Option<ClientInfo>;

    /// Bring a client to the foreground. Returns `false` if it is gone.
    fn focus(&self, id: &ClientId) -> bool;

    /// Open a new client at `url`.
    fn open(&self, url: &str) -> ClientInfo;

    /// Take control of every client. Returns how many were claimed.
    fn claim(&self) -> usize;

    fn list(&self) -> Vec<ClientInfo>;
}

/// Windows kept before the oldest unfocused ones are dropped.
pub const DEFAULT_CLIENT_CAPACITY: usize = 32;

/// In-memory client directory. Host windows register themselves over HTTP.
///
/// Holds at most `capacity` windows, oldest first; adding one beyond that
/// forgets the oldest window that is not focused.
#[derive(Debug)]
pub struct ClientDirectory {
    clients: RwLock<Vec<ClientInfo>>,
    capacity: usize,
}

impl Default for ClientDirectory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CLIENT_CAPACITY)
    }
}

impl ClientDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append a client, then evict the oldest unfocused ones over capacity.
    fn insert(&self, clients: &mut Vec<ClientInfo>, client: ClientInfo) {
        clients.push(client);
        while clients.len() > self.capacity {
            let newest = clients.len() - 1;
            let Some(oldest) = clients[..newest].iter().position(|c| !c.focused) else {
                break;
            };
            let evicted = clients.remove(oldest);
            tracing::debug!(client_id = %evicted.id, "Evicted oldest client");
        }
    }

    /// Register a window showing `url`, or update the URL of a known one.
    pub fn register(&self, id: Option<ClientId>, url: &str) -> ClientInfo {
        let mut clients = self.write();
        if let Some(id) = &id
            && let Some(existing) = clients.iter_mut().find(|c| &c.id == id)
        {
            existing.url = url.to_string();
            return existing.clone();
        }

        let client = ClientInfo {
            id: id.unwrap_or_else(ClientId::generate),
            url: url.to_string(),
            focused: false,
            controlled: false,
        };
        self.insert(&mut clients, client.clone());
        client
    }

    /// Remove a window. Returns whether it was registered.
    pub fn unregister(&self, id: &ClientId) -> bool {
        let mut clients = self.write();
        let before = clients.len();
        clients.retain(|c| &c.id != id);
        clients.len() != before
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ClientInfo>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ClientInfo>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether a client URL shows `target`. Absolute client URLs are compared by
/// path and query.
fn url_matches(client_url: &str, target: &str) -> bool {
    if client_url == target {
        return true;
    }
    Url::parse(client_url).is_ok_and(|url| {
        let path_and_query = url
            .query()
            .map_or_else(|| url.path().to_string(), |q| format!("{}?{q}", url.path()));
        path_and_query == target || url.as_str() == target
    })
}

impl ClientRegistry for ClientDirectory {
    fn find_by_url(&self, url: &str) -> Option<ClientInfo> {
        self.read()
            .iter()
            .find(|c| url_matches(&c.url, url))
            .cloned()
    }

    fn focus(&self, id: &ClientId) -> bool {
        let mut clients = self.write();
        if !clients.iter().any(|c| &c.id == id) {
            return false;
        }
        for client in clients.iter_mut() {
            client.focused = &client.id == id;
        }
        true
    }

    fn open(&self, url: &str) -> ClientInfo {
        let mut clients = self.write();
        for client in clients.iter_mut() {
            client.focused = false;
        }
        let client = ClientInfo {
            id: ClientId::generate(),
            url: url.to_string(),
            focused: true,
            controlled: true,
        };
        self.insert(&mut clients, client.clone());
        client
    }

    fn claim(&self) -> usize {
        let mut clients = self.write();
        let mut claimed = 0;
        for client in clients.iter_mut().filter(|c| !c.controlled) {
            client.controlled = true;
            claimed += 1;
        }
        claimed
    }

    fn list(&self) -> Vec<ClientInfo> {
        self.read().clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_find_matches_path_of_absolute_url() {
        let directory = ClientDirectory::new();
        directory.register(None, "https://app.eatech.ch/orders/42");

        assert!(directory.find_by_url("/orders/42").is_some());
        assert!(directory.find_by_url("/orders/43").is_none());
    }

    #[test]
    fn test_focus_is_exclusive() {
        let directory = ClientDirectory::new();
        let a = directory.register(None, "/menu");
        let b = directory.register(None, "/orders");

        assert!(directory.focus(&a.id));
        assert!(directory.focus(&b.id));
        let focused: Vec<_> = directory.list().into_iter().filter(|c| c.focused).collect();
        assert_eq!(focused.len(), 1);
        assert_eq!(focused[0].id, b.id);

        assert!(!directory.focus(&ClientId::new("gone")));
    }

    #[test]
    fn test_register_updates_known_client() {
        let directory = ClientDirectory::new();
        let id = ClientId::new("tab-1");
        directory.register(Some(id.clone()), "/menu");
        directory.register(Some(id.clone()), "/cart");

        let clients = directory.list();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].url, "/cart");
        assert!(directory.unregister(&id));
        assert!(!directory.unregister(&id));
    }

    #[test]
    fn test_claim_counts_uncontrolled() {
        let directory = ClientDirectory::new();
        directory.register(None, "/a");
        directory.register(None, "/b");
        assert_eq!(directory.claim(), 2);
        assert_eq!(directory.claim(), 0);
        assert!(directory.list().iter().all(|c| c.controlled));
    }

    #[test]
    fn test_directory_is_bounded() {
        let directory = ClientDirectory::with_capacity(3);
        let first = directory.register(None, "/a");
        directory.focus(&first.id);
        let second = directory.register(None, "/b");
        directory.register(None, "/c");

        // Each click that matches no window opens one
        for _ in 0..10 {
            directory.open("/orders/42");
        }

        let clients = directory.list();
        assert_eq!(clients.len(), 3);
        assert!(clients.iter().all(|c| c.id != second.id));
        assert_eq!(clients.iter().filter(|c| c.focused).count(), 1);
        assert_eq!(clients.last().unwrap().url, "/orders/42");
    }

    #[test]
    fn test_focused_client_survives_eviction() {
        let directory = ClientDirectory::with_capacity(2);
        let kept = directory.register(None, "/menu");
        directory.focus(&kept.id);
        directory.register(None, "/a");
        directory.register(None, "/b");

        let ids: Vec<ClientId> = directory.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&kept.id));
    }
}
