//! Submission path for new mutations: send now, or queue for later.

use std::time::Duration;

use sqlx::SqlitePool;
use tracing::instrument;

use eatech_core::QueueEntry;

use super::{ConnectivityMonitor, Submitter, SyncError};
use crate::db::QueueStore;
use crate::net::{FetchError, FetchResponse};

/// What happened to a submitted mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The upstream answered; its response is passed through as-is.
    Delivered(FetchResponse),
    /// The upstream was unreachable; the entry is in the durable queue.
    Queued(QueueEntry),
}

/// Sends mutations upstream, falling back to the durable queue.
#[derive(Clone)]
pub struct Outbox {
    pool: SqlitePool,
    submitter: Submitter,
    connectivity: ConnectivityMonitor,
    timeout: Duration,
}

impl Outbox {
    #[must_use]
    pub const fn new(
        pool: SqlitePool,
        submitter: Submitter,
        connectivity: ConnectivityMonitor,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            submitter,
            connectivity,
            timeout,
        }
    }

    /// Submit an entry, queueing it if the upstream cannot be reached.
    ///
    /// Any HTTP response counts as delivered, including error statuses: the
    /// upstream has seen the request and the caller gets its answer.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Repository` if the entry had to be queued and the
    /// write failed (including a duplicate entry ID).
    #[instrument(skip(self, entry), fields(queue = %entry.class(), entry_id = %entry.id))]
    pub async fn submit(&self, entry: QueueEntry) -> Result<SubmitOutcome, SyncError> {
        if self.connectivity.is_online() {
            let outcome =
                match tokio::time::timeout(self.timeout, self.submitter.submit(&entry.id, &entry.payload))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SyncError::Fetch(FetchError::Timeout)),
                };

            match outcome {
                Ok(response) => {
                    self.connectivity.observe::<()>(&Ok(()));
                    tracing::debug!(status = %response.status, "Submitted directly");
                    return Ok(SubmitOutcome::Delivered(response));
                }
                Err(SyncError::Fetch(e)) => {
                    self.connectivity.observe::<()>(&Err(e.clone()));
                    tracing::info!(error = %e, "Upstream unreachable, queueing");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cannot submit entry, queueing");
                }
            }
        }

        QueueStore::new(&self.pool).enqueue(&entry).await?;
        Ok(SubmitOutcome::Queued(entry))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use serde_json::json;
    use url::Url;

    use eatech_core::{Connectivity, Payload, QueueClass};

    use super::*;
    use crate::db::{RepositoryError, create_memory_pool};
    use crate::net::Upstream;
    use crate::testing::ScriptedFetcher;

    const VOICE_URL: &str = "https://api.eatech.test/api/voice/commands";

    fn entry() -> QueueEntry {
        QueueEntry::new(
            Payload::from_value(
                QueueClass::VoiceCommands,
                &json!({ "transcript": "eine Cola", "intent": "add_item" }),
            )
            .unwrap(),
        )
    }

    async fn outbox(fetcher: Arc<ScriptedFetcher>, online: bool) -> (Outbox, SqlitePool) {
        let pool = create_memory_pool().await.unwrap();
        let submitter = Submitter::new(
            fetcher,
            Upstream::new(Url::parse("https://api.eatech.test").unwrap()),
            None,
        );
        let connectivity = ConnectivityMonitor::new(Connectivity::from_online(online));
        (
            Outbox::new(pool.clone(), submitter, connectivity, Duration::from_millis(200)),
            pool,
        )
    }

    #[tokio::test]
    async fn test_online_submission_passes_response_through() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(VOICE_URL, StatusCode::BAD_REQUEST, r#"{"error":"unknown item"}"#);
        let (outbox, pool) = outbox(fetcher, true).await;

        let outcome = outbox.submit(entry()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Delivered(ref r) if r.status == StatusCode::BAD_REQUEST));
        assert_eq!(QueueStore::new(&pool).count(QueueClass::VoiceCommands).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_queues_without_network() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (outbox, pool) = outbox(fetcher.clone(), false).await;

        let outcome = outbox.submit(entry()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
        assert!(fetcher.requests().is_empty());
        assert_eq!(QueueStore::new(&pool).count(QueueClass::VoiceCommands).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transport_error_queues_and_marks_offline() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.fail(VOICE_URL, FetchError::Transport("reset".to_string()));
        let (outbox, pool) = outbox(fetcher, true).await;

        let queued = entry();
        let outcome = outbox.submit(queued.clone()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued(queued));
        assert!(!outbox.connectivity.is_online());
        assert_eq!(QueueStore::new(&pool).count(QueueClass::VoiceCommands).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_and_queues() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond_with_delay(VOICE_URL, StatusCode::OK, Duration::from_secs(5));
        let (outbox, _pool) = outbox(fetcher, true).await;

        let outcome = outbox.submit(entry()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    }

    #[tokio::test]
    async fn test_duplicate_queued_id_is_an_error() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (outbox, _pool) = outbox(fetcher, false).await;

        let first = entry();
        outbox.submit(first.clone()).await.unwrap();
        let err = outbox.submit(first).await.unwrap_err();
        assert!(matches!(err, SyncError::Repository(RepositoryError::Duplicate(_))));
    }
}
