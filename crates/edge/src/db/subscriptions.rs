//! The device's push subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use super::{RepositoryError, parse_timestamp};

/// Keys the messaging backend encrypts payloads with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A push subscription as issued by the push service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Repository for the single stored subscription.
pub struct SubscriptionStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SubscriptionStore<'a> {
    #[must_use]
    pub const fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// The current subscription, if any.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the query fails or the row is malformed.
    pub async fn current(&self) -> Result<Option<PushSubscription>, RepositoryError> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT endpoint, p256dh, auth, created_at FROM push_subscription WHERE slot = 1",
        )
        .fetch_optional(self.pool)
        .await?;

        row.map(|(endpoint, p256dh, auth, created_at)| {
            Ok(PushSubscription {
                endpoint,
                keys: SubscriptionKeys { p256dh, auth },
                created_at: parse_timestamp("created_at", &created_at)?,
            })
        })
        .transpose()
    }

    /// Store a subscription, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the write fails.
    pub async fn save(&self, subscription: &PushSubscription) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO push_subscription (slot, endpoint, p256dh, auth, created_at)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (slot) DO UPDATE SET
                endpoint = excluded.endpoint,
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                created_at = excluded.created_at
            ",
        )
        .bind(&subscription.endpoint)
        .bind(&subscription.keys.p256dh)
        .bind(&subscription.keys.auth)
        .bind(subscription.created_at.to_rfc3339())
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Forget the subscription. Returns whether one was stored.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the delete fails.
    pub async fn clear(&self) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM push_subscription")
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
