//! Persisted response caches.
//!
//! Backing store for [`crate::cache::CacheStorage`]. Responses are kept as
//! status, headers and body bytes, keyed by cache name and request key.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::instrument;

use crate::net::FetchResponse;

use super::{RepositoryError, parse_timestamp};

/// A response read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub response: FetchResponse,
    pub stored_at: DateTime<Utc>,
}

type ResponseRow = (i64, String, Vec<u8>, String);

/// Repository for cached responses.
pub struct ResponseStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ResponseStore<'a> {
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a cache name. Existing names are left alone.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn create_cache(&self, name: &str) -> Result<(), RepositoryError> {
        sqlx::query("INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Every recorded cache name, sorted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn cache_names(&self) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM caches ORDER BY name")
            .fetch_all(self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Delete a cache and its entries. Returns whether the name existed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    #[instrument(skip(self))]
    pub async fn delete_cache(&self, name: &str) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cache_entries WHERE cache_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM caches WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// One stored response.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::DataCorruption` if the row cannot be turned
    /// back into a response, `RepositoryError::Database` for storage failures.
    pub async fn get(&self, name: &str, key: &str) -> Result<Option<StoredResponse>, RepositoryError> {
        let row: Option<ResponseRow> = sqlx::query_as(
            "SELECT status, headers, body, stored_at FROM cache_entries WHERE cache_name = ? AND request_key = ?",
        )
        .bind(name)
        .bind(key)
        .fetch_optional(self.pool)
        .await?;

        row.map(decode).transpose()
    }

    /// Store a response, replacing any previous one for the key, then drop
    /// the oldest entries beyond `max_entries`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if a statement fails; nothing is changed then.
    #[instrument(skip(self, response), fields(status = %response.status))]
    pub async fn put(
        &self,
        name: &str,
        key: &str,
        response: &FetchResponse,
        stored_at: DateTime<Utc>,
        max_entries: u64,
    ) -> Result<(), RepositoryError> {
        let headers = encode_headers(&response.headers)?;
        let limit = i64::try_from(max_entries).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO caches (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r"
            INSERT INTO cache_entries (cache_name, request_key, status, headers, body, stored_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (cache_name, request_key) DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                stored_at = excluded.stored_at
            ",
        )
        .bind(name)
        .bind(key)
        .bind(i64::from(response.status.as_u16()))
        .bind(headers)
        .bind(response.body.as_ref())
        // Fixed width so the text column sorts chronologically
        .bind(stored_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r"
            DELETE FROM cache_entries
            WHERE cache_name = ?1 AND request_key NOT IN (
                SELECT request_key FROM cache_entries
                WHERE cache_name = ?1
                ORDER BY stored_at DESC
                LIMIT ?2
            )
            ",
        )
        .bind(name)
        .bind(limit)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete one entry. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn remove(&self, name: &str, key: &str) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM cache_entries WHERE cache_name = ? AND request_key = ?")
                .bind(name)
                .bind(key)
                .execute(self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of entries in a cache.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn count(&self, name: &str) -> Result<u64, RepositoryError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM cache_entries WHERE cache_name = ?")
                .bind(name)
                .fetch_one(self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// Headers as a JSON array of `[name, value]` pairs, in order.
fn encode_headers(headers: &HeaderMap) -> Result<String, RepositoryError> {
    let mut pairs = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let Ok(value) = std::str::from_utf8(value.as_bytes()) else {
            tracing::debug!(header = %name, "Dropping non-UTF-8 header from cached response");
            continue;
        };
        pairs.push((name.as_str(), value));
    }
    serde_json::to_string(&pairs)
        .map_err(|e| RepositoryError::DataCorruption(format!("unserializable headers: {e}")))
}

fn decode_headers(raw: &str) -> Result<HeaderMap, RepositoryError> {
    let pairs: Vec<(String, String)> = serde_json::from_str(raw)
        .map_err(|e| RepositoryError::DataCorruption(format!("invalid cached headers: {e}")))?;

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| RepositoryError::DataCorruption(format!("invalid value for {name}: {e}")))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn decode((status, headers, body, stored_at): ResponseRow) -> Result<StoredResponse, RepositoryError> {
    let status = u16::try_from(status)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| RepositoryError::DataCorruption(format!("invalid cached status {status}")))?;

    Ok(StoredResponse {
        response: FetchResponse {
            status,
            headers: decode_headers(&headers)?,
            body: body.into(),
        },
        stored_at: parse_timestamp("stored_at", &stored_at)?,
    })
}
