//! Named response caches.
//!
//! A set of named caches, each a `moka` future cache keyed by request and
//! bounded by the [`CachePolicy`] its name selects. Names follow the
//! `eatech-{kind}-{version}` scheme from [`CacheNames`]; the lifecycle
//! manager deletes names from older versions on activation.
//!
//! With a pool attached ([`CacheStorage::persistent`]) every write also goes
//! to the `cache_entries` table and misses are read back from it, so caches
//! outlive a restart. Storage failures are logged and treated as misses.
//!
//! Responses are stored exactly as fetched (status, headers, body bytes) and
//! replayed unchanged.

mod names;

pub use names::{CACHE_PREFIX, CacheName, CacheNames, CachePolicy};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::Method;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use url::Url;

use crate::db::ResponseStore;
use crate::net::FetchResponse;

/// Identifies a cached request: method plus absolute URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("{method} {url}"))
    }

    /// Key for a `GET` of `url`.
    #[must_use]
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A response with the time it was first stored.
#[derive(Debug, Clone)]
struct Entry {
    response: FetchResponse,
    stored_at: DateTime<Utc>,
}

impl Entry {
    fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }
}

/// Expires an entry `max_age` after it was stored, not after it was loaded.
struct AgeExpiry {
    max_age: Option<Duration>,
}

impl AgeExpiry {
    fn remaining(&self, entry: &Entry) -> Option<Duration> {
        self.max_age.map(|max_age| max_age.saturating_sub(entry.age()))
    }
}

impl Expiry<RequestKey, Entry> for AgeExpiry {
    fn expire_after_create(&self, _key: &RequestKey, entry: &Entry, _now: Instant) -> Option<Duration> {
        self.remaining(entry)
    }

    fn expire_after_update(
        &self,
        _key: &RequestKey,
        entry: &Entry,
        _now: Instant,
        _current: Option<Duration>,
    ) -> Option<Duration> {
        self.remaining(entry)
    }
}

/// A handle to one named cache.
#[derive(Clone)]
pub struct NamedCache {
    name: Arc<str>,
    policy: CachePolicy,
    entries: Cache<RequestKey, Entry>,
    pool: Option<SqlitePool>,
}

impl NamedCache {
    fn with_policy(name: &str, policy: CachePolicy, pool: Option<SqlitePool>) -> Self {
        let entries = Cache::builder()
            .max_capacity(policy.max_entries)
            .expire_after(AgeExpiry {
                max_age: policy.max_age,
            })
            .build();
        Self {
            name: Arc::from(name),
            policy,
            entries,
            pool,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_expired(&self, stored_at: DateTime<Utc>) -> bool {
        self.policy
            .max_age
            .is_some_and(|max_age| (Utc::now() - stored_at).to_std().unwrap_or_default() >= max_age)
    }

    /// Look up a stored response.
    pub async fn get(&self, key: &RequestKey) -> Option<FetchResponse> {
        if let Some(entry) = self.entries.get(key).await {
            return Some(entry.response);
        }
        let pool = self.pool.as_ref()?;
        let store = ResponseStore::new(pool);

        let stored = match store.get(&self.name, key.as_str()).await {
            Ok(stored) => stored?,
            Err(e) => {
                tracing::warn!(cache = %self.name, %key, error = %e, "Failed to read cached response");
                return None;
            }
        };
        if self.is_expired(stored.stored_at) {
            if let Err(e) = store.remove(&self.name, key.as_str()).await {
                tracing::warn!(cache = %self.name, %key, error = %e, "Failed to drop expired response");
            }
            return None;
        }

        let entry = Entry {
            response: stored.response,
            stored_at: stored.stored_at,
        };
        self.entries.insert(key.clone(), entry.clone()).await;
        Some(entry.response)
    }

    /// Store a response, replacing any previous one for the key.
    pub async fn put(&self, key: RequestKey, response: FetchResponse) {
        let stored_at = Utc::now();
        if let Some(pool) = &self.pool
            && let Err(e) = ResponseStore::new(pool)
                .put(&self.name, key.as_str(), &response, stored_at, self.policy.max_entries)
                .await
        {
            tracing::warn!(cache = %self.name, %key, error = %e, "Failed to persist cached response");
        }
        self.entries.insert(key, Entry { response, stored_at }).await;
    }

    /// Number of live entries.
    pub async fn len(&self) -> u64 {
        if let Some(pool) = &self.pool {
            match ResponseStore::new(pool).count(&self.name).await {
                Ok(count) => return count,
                Err(e) => tracing::warn!(cache = %self.name, error = %e, "Failed to count cached responses"),
            }
        }
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for NamedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedCache")
            .field("name", &self.name)
            .field("entries", &self.entries.entry_count())
            .field("persistent", &self.pool.is_some())
            .finish()
    }
}

/// The collection of named caches.
#[derive(Clone, Default)]
pub struct CacheStorage {
    caches: Arc<RwLock<BTreeMap<String, NamedCache>>>,
    pool: Option<SqlitePool>,
}

impl CacheStorage {
    /// Caches that live only as long as the process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caches persisted in the `SQLite` store behind `pool`.
    #[must_use]
    pub fn persistent(pool: SqlitePool) -> Self {
        Self {
            caches: Arc::default(),
            pool: Some(pool),
        }
    }

    /// Open a cache by name, creating it if needed.
    pub async fn open(&self, name: &str) -> NamedCache {
        if let Some(cache) = self.caches.read().await.get(name) {
            return cache.clone();
        }

        if let Some(pool) = &self.pool
            && let Err(e) = ResponseStore::new(pool).create_cache(name).await
        {
            tracing::warn!(cache = name, error = %e, "Failed to record cache name");
        }

        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                let policy =
                    CacheName::parse(name).map_or_else(CachePolicy::fallback, |parsed| {
                        CachePolicy::for_kind(parsed.kind)
                    });
                NamedCache::with_policy(name, policy, self.pool.clone())
            })
            .clone()
    }

    /// Delete a cache and everything in it. Returns whether it existed.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.caches.write().await.remove(name);
        if let Some(cache) = &removed {
            cache.entries.invalidate_all();
        }

        let mut persisted = false;
        if let Some(pool) = &self.pool {
            match ResponseStore::new(pool).delete_cache(name).await {
                Ok(existed) => persisted = existed,
                Err(e) => tracing::warn!(cache = name, error = %e, "Failed to delete persisted cache"),
            }
        }
        removed.is_some() || persisted
    }

    /// Names of all caches, sorted, including those persisted by an earlier run.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = self.caches.read().await.keys().cloned().collect();
        if let Some(pool) = &self.pool {
            match ResponseStore::new(pool).cache_names().await {
                Ok(persisted) => names.extend(persisted),
                Err(e) => tracing::warn!(error = %e, "Failed to list persisted caches"),
            }
        }
        names.into_iter().collect()
    }
}

impl std::fmt::Debug for CacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStorage")
            .field("persistent", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}
