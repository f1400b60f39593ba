//! Local `SQLite` persistence.
//!
//! # Tables
//!
//! - `pending_orders`, `pending_analytics`, `pending_voice_commands` - the
//!   durable mutation queue, one table per queue class
//! - `delivery_attempts` - failed delivery bookkeeping per entry
//! - `dead_letters` - entries that exhausted a bounded retry policy
//! - `push_subscription` - the device's push subscription (zero or one row)
//! - `caches`, `cache_entries` - named response caches and their entries
//!
//! # Migrations
//!
//! Migrations live in `crates/edge/migrations/`, are embedded in the binary and
//! run on connect. They can also be applied explicitly:
//! ```bash
//! eatech migrate
//! ```

pub mod attempts;
pub mod queue;
pub mod responses;
pub mod subscriptions;

use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use thiserror::Error;

pub use attempts::{AttemptRecord, DeadLetter, DeliveryAttempts};
pub use queue::QueueStore;
pub use responses::{ResponseStore, StoredResponse};
pub use subscriptions::{PushSubscription, SubscriptionKeys, SubscriptionStore};

/// Embedded schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// An entry with this ID is already stored.
    #[error("duplicate entry: {0}")]
    Duplicate(String),
}

impl RepositoryError {
    /// Map a unique-constraint violation to [`RepositoryError::Duplicate`].
    pub(crate) fn from_insert(e: sqlx::Error, id: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return Self::Duplicate(id.to_owned());
        }
        Self::Database(e)
    }
}

/// Create a `SQLite` connection pool and apply pending migrations.
///
/// The database file is created if missing (`mode=rwc` is implied).
///
/// # Errors
///
/// Returns `RepositoryError` if the URL is invalid, the file cannot be opened,
/// or a migration fails.
pub async fn create_pool(database_url: &SecretString) -> Result<SqlitePool, RepositoryError> {
    let options = SqliteConnectOptions::from_str(database_url.expose_secret())?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// An in-memory database with the schema applied.
///
/// Uses a single connection, so every query sees the same memory database.
///
/// # Errors
///
/// Returns `RepositoryError` if the schema cannot be applied.
pub async fn create_memory_pool() -> Result<SqlitePool, RepositoryError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_timestamp(
    column: &str,
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid {column} '{value}': {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_has_schema() {
        let pool = create_memory_pool().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(
            names,
            [
                "cache_entries",
                "caches",
                "dead_letters",
                "delivery_attempts",
                "pending_analytics",
                "pending_orders",
                "pending_voice_commands",
                "push_subscription",
            ]
        );
    }

    #[tokio::test]
    async fn test_file_pool_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.db");
        let url = SecretString::from(format!("sqlite://{}", path.display()));

        let pool = create_pool(&url).await.unwrap();
        pool.close().await;

        assert!(path.exists());
        // Running migrations again on an existing file is a no-op.
        let pool = create_pool(&url).await.unwrap();
        pool.close().await;
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("created_at", "2026-03-01T12:00:00Z").is_ok());
        let err = parse_timestamp("created_at", "yesterday").unwrap_err();
        assert!(matches!(err, RepositoryError::DataCorruption(_)));
    }
}
