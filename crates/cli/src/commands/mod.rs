//! CLI command implementations.

pub mod migrate;
pub mod queue;
pub mod sync;

use secrecy::SecretString;
use sqlx::SqlitePool;

use eatech_edge::config::DEFAULT_DATABASE_URL;
use eatech_edge::db::{self, RepositoryError};

/// Open the queue store named by `EATECH_DATABASE_URL`, applying migrations.
pub async fn open_store() -> Result<SqlitePool, RepositoryError> {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("EATECH_DATABASE_URL")
        .ok()
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| {
            tracing::warn!("EATECH_DATABASE_URL not set, using {DEFAULT_DATABASE_URL}");
            DEFAULT_DATABASE_URL.to_owned()
        });

    tracing::debug!("Opening queue store...");
    db::create_pool(&SecretString::from(database_url)).await
}
