//! Durable queue of pending mutations.
//!
//! Each queue class has its own table. Entries are insert/delete only: the
//! payload text written by [`QueueStore::enqueue`] is the text that is later
//! submitted upstream.

use std::collections::BTreeMap;

use sqlx::SqlitePool;
use tracing::instrument;

use eatech_core::{EntryId, Payload, QueueClass, QueueEntry};

use super::{RepositoryError, parse_timestamp};

/// Table backing a queue class.
pub(crate) const fn table(class: QueueClass) -> &'static str {
    match class {
        QueueClass::Orders => "pending_orders",
        QueueClass::Analytics => "pending_analytics",
        QueueClass::VoiceCommands => "pending_voice_commands",
    }
}

type EntryRow = (String, String, String);

/// Repository for queued mutations.
pub struct QueueStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> QueueStore<'a> {
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new entry in its class's table.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Duplicate` if an entry with the same ID exists,
    /// `RepositoryError::Database` for storage failures.
    #[instrument(skip(self, entry), fields(queue = %entry.class(), entry_id = %entry.id))]
    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<(), RepositoryError> {
        let sql = format!(
            "INSERT INTO {} (id, payload, created_at) VALUES (?, ?, ?)",
            table(entry.class())
        );
        sqlx::query(&sql)
            .bind(entry.id.as_str())
            .bind(entry.payload.as_str())
            .bind(entry.created_at.to_rfc3339())
            .execute(self.pool)
            .await
            .map_err(|e| RepositoryError::from_insert(e, entry.id.as_str()))?;

        tracing::debug!("Entry queued");
        Ok(())
    }

    /// Every readable entry of a class, in arrival order.
    ///
    /// Rows whose payload no longer decodes are logged and left out, so one
    /// bad row cannot hold back the rest of the class.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn list_all(&self, class: QueueClass) -> Result<Vec<QueueEntry>, RepositoryError> {
        let sql = format!(
            "SELECT id, payload, created_at FROM {} ORDER BY seq",
            table(class)
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql).fetch_all(self.pool).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                decode(class, row)
                    .inspect_err(|e| {
                        tracing::warn!(queue = %class, error = %e, "Skipping unreadable queue entry");
                    })
                    .ok()
            })
            .collect())
    }

    /// One entry by ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::DataCorruption` if the stored payload no
    /// longer parses, `RepositoryError::Database` for storage failures.
    pub async fn get(
        &self,
        class: QueueClass,
        id: &EntryId,
    ) -> Result<Option<QueueEntry>, RepositoryError> {
        let sql = format!(
            "SELECT id, payload, created_at FROM {} WHERE id = ?",
            table(class)
        );
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(id.as_str())
            .fetch_optional(self.pool)
            .await?;

        row.map(|row| decode(class, row)).transpose()
    }

    /// Delete an entry. Removing an absent ID is not an error.
    ///
    /// Returns whether a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    #[instrument(skip(self), fields(queue = %class, entry_id = %id))]
    pub async fn remove(&self, class: QueueClass, id: &EntryId) -> Result<bool, RepositoryError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", table(class));
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of pending entries in a class.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn count(&self, class: QueueClass) -> Result<u64, RepositoryError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table(class));
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(self.pool).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Pending entry counts for every class.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` for storage failures.
    pub async fn counts(&self) -> Result<BTreeMap<QueueClass, u64>, RepositoryError> {
        let mut counts = BTreeMap::new();
        for class in QueueClass::ALL {
            counts.insert(class, self.count(class).await?);
        }
        Ok(counts)
    }
}

fn decode(class: QueueClass, (id, payload, created_at): EntryRow) -> Result<QueueEntry, RepositoryError> {
    let payload = Payload::parse(class, payload.as_bytes()).map_err(|e| {
        RepositoryError::DataCorruption(format!("invalid {class} payload for entry {id}: {e}"))
    })?;

    Ok(QueueEntry {
        id: EntryId::new(id),
        payload,
        created_at: parse_timestamp("created_at", &created_at)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::create_memory_pool;

    fn order(tenant: &str) -> Payload {
        Payload::from_value(
            QueueClass::Orders,
            &json!({
                "tenantId": tenant,
                "lines": [{
                    "productId": "burger-classic",
                    "name": "Classic Burger",
                    "quantity": 2,
                    "unitPrice": { "amount": "14.50", "currencyCode": "CHF" }
                }],
                "tableNumber": 7
            }),
        )
        .unwrap()
    }

    fn event(name: &str) -> Payload {
        Payload::from_value(QueueClass::Analytics, &json!({ "name": name })).unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_then_list() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);

        let entry = QueueEntry::with_id(EntryId::new("order-1"), order("zuri-burger"));
        store.enqueue(&entry).await.unwrap();

        let listed = store.list_all(QueueClass::Orders).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, entry.id);
        assert_eq!(listed[0].payload, entry.payload);
        assert!(store.list_all(QueueClass::Analytics).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_keeps_arrival_order() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);

        for name in ["b", "a", "c"] {
            let entry = QueueEntry::with_id(EntryId::new(name), event("page_view"));
            store.enqueue(&entry).await.unwrap();
        }

        let ids: Vec<String> = store
            .list_all(QueueClass::Analytics)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id.into_inner())
            .collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);

        let entry = QueueEntry::with_id(EntryId::new("dup"), order("a"));
        store.enqueue(&entry).await.unwrap();

        let again = QueueEntry::with_id(EntryId::new("dup"), order("b"));
        let err = store.enqueue(&again).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(ref id) if id == "dup"));

        // The original payload is untouched.
        let stored = store
            .get(QueueClass::Orders, &EntryId::new("dup"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, entry.payload);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);

        let entry = QueueEntry::new(order("zuri-burger"));
        store.enqueue(&entry).await.unwrap();

        assert!(store.remove(QueueClass::Orders, &entry.id).await.unwrap());
        assert!(!store.remove(QueueClass::Orders, &entry.id).await.unwrap());
        assert!(store.list_all(QueueClass::Orders).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_id_in_other_class_is_independent() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);

        store
            .enqueue(&QueueEntry::with_id(EntryId::new("x"), order("t")))
            .await
            .unwrap();
        store
            .enqueue(&QueueEntry::with_id(EntryId::new("x"), event("click")))
            .await
            .unwrap();

        assert!(store.remove(QueueClass::Analytics, &EntryId::new("x")).await.unwrap());
        assert_eq!(store.count(QueueClass::Orders).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counts() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);
        store.enqueue(&QueueEntry::new(event("a"))).await.unwrap();
        store.enqueue(&QueueEntry::new(event("b"))).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts[&QueueClass::Analytics], 2);
        assert_eq!(counts[&QueueClass::Orders], 0);
        assert_eq!(counts[&QueueClass::VoiceCommands], 0);
    }

    #[tokio::test]
    async fn test_stored_text_is_verbatim() {
        let pool = create_memory_pool().await.unwrap();
        let store = QueueStore::new(&pool);

        let body = br#"{"event":"menu_view"}"#;
        let entry = QueueEntry::with_id(
            EntryId::new("evt"),
            Payload::parse(QueueClass::Analytics, body).unwrap(),
        );
        store.enqueue(&entry).await.unwrap();

        let listed = store.list_all(QueueClass::Analytics).await.unwrap();
        assert_eq!(listed[0].payload.as_bytes(), body);
    }

    #[tokio::test]
    async fn test_corrupt_row_is_skipped_in_listing() {
        let pool = create_memory_pool().await.unwrap();
        sqlx::query("INSERT INTO pending_voice_commands (id, payload, created_at) VALUES ('v', '{}', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .unwrap();
        let store = QueueStore::new(&pool);
        store
            .enqueue(&QueueEntry::with_id(
                EntryId::new("ok"),
                Payload::parse(QueueClass::VoiceCommands, br#"{"transcript":"eis Bier"}"#).unwrap(),
            ))
            .await
            .unwrap();

        let listed = store.list_all(QueueClass::VoiceCommands).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, EntryId::new("ok"));

        let err = store
            .get(QueueClass::VoiceCommands, &EntryId::new("v"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::DataCorruption(_)));
    }
}
