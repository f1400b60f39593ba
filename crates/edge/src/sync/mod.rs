//! Background sync: draining the durable queue to the upstream.
//!
//! # Architecture
//!
//! A drain is triggered by a sync tag (`sync-orders`, `sync-analytics`,
//! `sync-voice-commands`), by a reconnect, or by the periodic wake. It lists
//! every pending entry of the class and submits them one by one, in arrival
//! order. A 2xx response removes the entry; anything else records a failed
//! attempt and leaves the entry for the next drain. One failure never aborts
//! the rest of the batch.
//!
//! Drains of the same class are serialized by a per-class mutex, so an entry
//! is never submitted twice concurrently. Different classes drain in parallel.

mod connectivity;
mod outbox;
mod retry;

pub use connectivity::{ConnectivityMonitor, HEALTH_PATH};
pub use outbox::{Outbox, SubmitOutcome};
pub use retry::RetryPolicy;

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

use eatech_core::push::{NotificationData, NotificationKind, PushMessage};
use eatech_core::{EntryId, Mutation, Payload, QueueClass, QueueEntry, SyncTag};

use crate::db::{AttemptRecord, DeliveryAttempts, QueueStore, RepositoryError};
use crate::net::{FetchError, FetchRequest, FetchResponse, Fetcher, Upstream};
use crate::push::NotificationSink;

/// Header carrying the entry ID so the upstream can drop replays.
pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

/// Errors that abort a drain or a submission.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The entry could not be turned into a request.
    #[error("cannot encode entry: {0}")]
    Encode(String),
}

/// Result of one drain of one queue class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub class: QueueClass,
    /// Entries submitted to the upstream.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Entries skipped because their backoff has not elapsed.
    pub deferred: usize,
    pub dead_lettered: usize,
}

impl SyncReport {
    const fn empty(class: QueueClass) -> Self {
        Self {
            class,
            attempted: 0,
            delivered: 0,
            failed: 0,
            deferred: 0,
            dead_lettered: 0,
        }
    }
}

/// Builds and sends mutation submissions.
#[derive(Clone)]
pub struct Submitter {
    fetcher: Arc<dyn Fetcher>,
    upstream: Upstream,
    api_token: Option<SecretString>,
}

impl Submitter {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        upstream: Upstream,
        api_token: Option<SecretString>,
    ) -> Self {
        Self {
            fetcher,
            upstream,
            api_token,
        }
    }

    /// The `POST` that submits `payload` to its class endpoint.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Encode` if the payload, ID or token cannot be encoded.
    pub fn request(&self, id: &EntryId, payload: &Payload) -> Result<FetchRequest, SyncError> {
        let url = self.upstream.url_for(payload.class().endpoint())?;
        let body = payload.as_bytes().to_vec();
        let key = HeaderValue::from_str(id.as_str())
            .map_err(|_| SyncError::Encode(format!("entry ID '{id}' is not a valid header")))?;

        let mut request = FetchRequest::post_json(url, body).with_header(IDEMPOTENCY_KEY, key);
        if let Some(token) = &self.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
                .map_err(|_| SyncError::Encode("API token is not a valid header".to_string()))?;
            value.set_sensitive(true);
            request = request.with_header(AUTHORIZATION, value);
        }
        Ok(request)
    }

    /// Submit one entry.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Fetch` if the upstream could not be reached.
    pub async fn submit(&self, id: &EntryId, payload: &Payload) -> Result<FetchResponse, SyncError> {
        let request = self.request(id, payload)?;
        Ok(self.fetcher.fetch(request).await?)
    }
}

struct DrainLocks {
    orders: Mutex<()>,
    analytics: Mutex<()>,
    voice_commands: Mutex<()>,
}

impl DrainLocks {
    fn new() -> Self {
        Self {
            orders: Mutex::new(()),
            analytics: Mutex::new(()),
            voice_commands: Mutex::new(()),
        }
    }

    const fn for_class(&self, class: QueueClass) -> &Mutex<()> {
        match class {
            QueueClass::Orders => &self.orders,
            QueueClass::Analytics => &self.analytics,
            QueueClass::VoiceCommands => &self.voice_commands,
        }
    }
}

/// Drains queued mutations to the upstream.
pub struct SyncCoordinator {
    pool: SqlitePool,
    submitter: Submitter,
    retry: RetryPolicy,
    connectivity: ConnectivityMonitor,
    notifications: Arc<dyn NotificationSink>,
    locks: DrainLocks,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        submitter: Submitter,
        retry: RetryPolicy,
        connectivity: ConnectivityMonitor,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            pool,
            submitter,
            retry,
            connectivity,
            notifications,
            locks: DrainLocks::new(),
        }
    }

    /// Handle a sync event.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Repository` if the queue cannot be read.
    pub async fn sync(&self, tag: SyncTag) -> Result<SyncReport, SyncError> {
        self.drain(tag.class()).await
    }

    /// Drain every class concurrently.
    ///
    /// All three drains run to completion; the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Repository` if any queue cannot be read.
    pub async fn sync_all(&self) -> Result<Vec<SyncReport>, SyncError> {
        let (orders, analytics, voice) = tokio::join!(
            self.drain(QueueClass::Orders),
            self.drain(QueueClass::Analytics),
            self.drain(QueueClass::VoiceCommands),
        );
        [orders, analytics, voice].into_iter().collect()
    }

    /// Submit every pending entry of `class` once.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Repository` if the queue or its attempt records
    /// cannot be read. Per-entry failures are recorded, not returned.
    #[instrument(skip(self), fields(queue = %class))]
    pub async fn drain(&self, class: QueueClass) -> Result<SyncReport, SyncError> {
        let _guard = self.locks.for_class(class).lock().await;

        let store = QueueStore::new(&self.pool);
        let attempts = DeliveryAttempts::new(&self.pool);
        let mut report = SyncReport::empty(class);

        let entries = store.list_all(class).await?;
        if entries.is_empty() {
            return Ok(report);
        }
        let history = attempts.for_class(class).await?;
        let now = Utc::now();

        for entry in entries {
            let previous = history.get(&entry.id);
            if previous.is_some_and(|record| !record.is_due(now)) {
                report.deferred += 1;
                continue;
            }

            report.attempted += 1;
            let outcome = self.submitter.submit(&entry.id, &entry.payload).await;
            if let Err(SyncError::Fetch(e)) = &outcome {
                self.connectivity.observe::<()>(&Err(e.clone()));
            }

            match outcome {
                Ok(response) if response.is_success() => {
                    self.connectivity.observe::<()>(&Ok(()));
                    self.confirm(&store, &attempts, &entry).await;
                    report.delivered += 1;
                }
                Ok(response) => {
                    self.connectivity.observe::<()>(&Ok(()));
                    let reason = format!("upstream answered {}", response.status);
                    if self.record_failure(&attempts, &entry, previous, reason).await {
                        report.dead_lettered += 1;
                    }
                    report.failed += 1;
                }
                Err(e) => {
                    if self.record_failure(&attempts, &entry, previous, e.to_string()).await {
                        report.dead_lettered += 1;
                    }
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            deferred = report.deferred,
            dead_lettered = report.dead_lettered,
            "Drain finished"
        );
        Ok(report)
    }

    /// Remove a delivered entry and confirm it to the user.
    async fn confirm(&self, store: &QueueStore<'_>, attempts: &DeliveryAttempts<'_>, entry: &QueueEntry) {
        // The upstream has the entry; a failed delete only means a replay,
        // which the idempotency key makes harmless.
        if let Err(e) = store.remove(entry.class(), &entry.id).await {
            tracing::error!(entry_id = %entry.id, error = %e, "Failed to remove delivered entry");
        }
        if let Err(e) = attempts.clear(entry.class(), &entry.id).await {
            tracing::error!(entry_id = %entry.id, error = %e, "Failed to clear attempt record");
        }

        if let Mutation::Order(order) = entry.payload.mutation() {
            let url = order
                .order_id
                .as_ref()
                .map_or_else(|| "/orders".to_string(), |id| format!("/orders/{id}"));
            let notification = PushMessage {
                title: Some("Order sent".to_string()),
                body: Some("Your order was sent to the restaurant.".to_string()),
                tag: Some(format!("order-sent-{}", entry.id)),
                kind: Some(NotificationKind::OrderUpdate),
                data: Some(NotificationData {
                    url: Some(url),
                    order_id: order.order_id.clone(),
                    tenant_id: Some(order.tenant_id.clone()),
                    ..NotificationData::default()
                }),
                ..PushMessage::default()
            }
            .into_notification();
            self.notifications.show(notification);
        }
    }

    /// Record a failed attempt. Returns whether the entry was dead-lettered.
    async fn record_failure(
        &self,
        attempts: &DeliveryAttempts<'_>,
        entry: &QueueEntry,
        previous: Option<&AttemptRecord>,
        reason: String,
    ) -> bool {
        let count = previous.map_or(0, |record| record.attempts).saturating_add(1);
        tracing::warn!(entry_id = %entry.id, attempts = count, reason = %reason, "Delivery failed");

        let record = AttemptRecord {
            queue: entry.class(),
            entry_id: entry.id.clone(),
            attempts: count,
            last_error: Some(reason),
            next_attempt_at: self.retry.next_attempt_at(count, Utc::now()),
        };

        if self.retry.is_exhausted(count) {
            match attempts.dead_letter(entry, &record).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::error!(entry_id = %entry.id, error = %e, "Failed to dead-letter entry");
                }
            }
        }

        if let Err(e) = attempts.save(&record).await {
            tracing::error!(entry_id = %entry.id, error = %e, "Failed to record attempt");
        }
        false
    }
}
