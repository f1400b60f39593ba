//! Delivery attempt bookkeeping and the dead-letter table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::instrument;

use eatech_core::{EntryId, QueueClass, QueueEntry};

use super::queue::table;
use super::{RepositoryError, parse_timestamp};

/// Failed delivery history of one queued entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub queue: QueueClass,
    pub entry_id: EntryId,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// Whether the entry may be submitted at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }
}

/// An entry that was given up on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub queue: QueueClass,
    pub entry_id: EntryId,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub failed_at: DateTime<Utc>,
}

type AttemptRow = (String, String, i64, Option<String>, String);
type DeadLetterRow = (String, String, String, String, i64, Option<String>, String);

/// Repository for delivery attempts and dead letters.
pub struct DeliveryAttempts<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DeliveryAttempts<'a> {
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Attempt records of every entry in a class that has failed at least once.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the query fails or a row is malformed.
    pub async fn for_class(
        &self,
        class: QueueClass,
    ) -> Result<HashMap<EntryId, AttemptRecord>, RepositoryError> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT queue, entry_id, attempts, last_error, next_attempt_at FROM delivery_attempts WHERE queue = ?",
        )
        .bind(class.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(|row| decode_attempt(row).map(|record| (record.entry_id.clone(), record)))
            .collect()
    }

    /// Insert or replace the record for an entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the write fails.
    #[instrument(skip(self, record), fields(queue = %record.queue, entry_id = %record.entry_id, attempts = record.attempts))]
    pub async fn save(&self, record: &AttemptRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO delivery_attempts (queue, entry_id, attempts, last_error, next_attempt_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (queue, entry_id) DO UPDATE SET
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                next_attempt_at = excluded.next_attempt_at
            ",
        )
        .bind(record.queue.as_str())
        .bind(record.entry_id.as_str())
        .bind(i64::from(record.attempts))
        .bind(record.last_error.as_deref())
        .bind(record.next_attempt_at.to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Forget the history of an entry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn clear(&self, class: QueueClass, id: &EntryId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM delivery_attempts WHERE queue = ? AND entry_id = ?")
            .bind(class.as_str())
            .bind(id.as_str())
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Move an entry out of its queue into `dead_letters`, in one transaction.
    ///
    /// An earlier dead letter with the same class and ID is replaced.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if any statement fails; nothing is changed then.
    #[instrument(skip(self, entry, record), fields(queue = %entry.class(), entry_id = %entry.id))]
    pub async fn dead_letter(
        &self,
        entry: &QueueEntry,
        record: &AttemptRecord,
    ) -> Result<(), RepositoryError> {
        let class = entry.class();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO dead_letters (queue, entry_id, payload, created_at, attempts, last_error, failed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (queue, entry_id) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                failed_at = excluded.failed_at
            ",
        )
        .bind(class.as_str())
        .bind(entry.id.as_str())
        .bind(entry.payload.as_str())
        .bind(entry.created_at.to_rfc3339())
        .bind(i64::from(record.attempts))
        .bind(record.last_error.as_deref())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let delete = format!("DELETE FROM {} WHERE id = ?", table(class));
        sqlx::query(&delete)
            .bind(entry.id.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM delivery_attempts WHERE queue = ? AND entry_id = ?")
            .bind(class.as_str())
            .bind(entry.id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::warn!(attempts = record.attempts, "Entry moved to dead letters");
        Ok(())
    }

    /// Dead letters, oldest first, optionally for one class.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the query fails or a row is malformed.
    pub async fn dead_letters(
        &self,
        class: Option<QueueClass>,
    ) -> Result<Vec<DeadLetter>, RepositoryError> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            r"
            SELECT queue, entry_id, payload, created_at, attempts, last_error, failed_at
            FROM dead_letters
            WHERE ?1 IS NULL OR queue = ?1
            ORDER BY seq
            ",
        )
        .bind(class.map(QueueClass::as_str))
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(decode_dead_letter).collect()
    }

    /// Delete every dead letter. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn purge_dead_letters(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM dead_letters")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn decode_queue(value: &str) -> Result<QueueClass, RepositoryError> {
    value
        .parse()
        .map_err(|_| RepositoryError::DataCorruption(format!("unknown queue '{value}'")))
}

fn decode_count(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("invalid attempt count {value}")))
}

fn decode_attempt(
    (queue, entry_id, attempts, last_error, next_attempt_at): AttemptRow,
) -> Result<AttemptRecord, RepositoryError> {
    Ok(AttemptRecord {
        queue: decode_queue(&queue)?,
        entry_id: EntryId::new(entry_id),
        attempts: decode_count(attempts)?,
        last_error,
        next_attempt_at: parse_timestamp("next_attempt_at", &next_attempt_at)?,
    })
}

fn decode_dead_letter(
    (queue, entry_id, payload, created_at, attempts, last_error, failed_at): DeadLetterRow,
) -> Result<DeadLetter, RepositoryError> {
    Ok(DeadLetter {
        queue: decode_queue(&queue)?,
        entry_id: EntryId::new(entry_id),
        payload: serde_json::from_str(&payload)
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid dead letter payload: {e}")))?,
        created_at: parse_timestamp("created_at", &created_at)?,
        attempts: decode_count(attempts)?,
        last_error,
        failed_at: parse_timestamp("failed_at", &failed_at)?,
    })
}
