//! Queue store migrations.
//!
//! # Usage
//!
//! ```bash
//! eatech migrate
//! ```
//!
//! # Environment Variables
//!
//! - `EATECH_DATABASE_URL` - `SQLite` URL of the queue store
//!   (default `sqlite://eatech-edge.db?mode=rwc`)

use eatech_edge::db::{MIGRATOR, RepositoryError};

/// Create the queue store if needed and apply pending migrations.
pub async fn run() -> Result<(), RepositoryError> {
    let pool = super::open_store().await?;

    tracing::info!(
        migrations = MIGRATOR.iter().count(),
        "Queue store migrations complete!"
    );
    pool.close().await;
    Ok(())
}
