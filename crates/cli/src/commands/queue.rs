//! Durable queue inspection.
//!
//! # Usage
//!
//! ```bash
//! eatech queue count
//! eatech queue list orders
//! eatech queue dead-letters
//! eatech queue purge-dead-letters
//! eatech queue enqueue orders ./order.json --id order-7f3a
//! ```
//!
//! Listings are printed as JSON on stdout.

use std::path::{Path, PathBuf};

use eatech_core::{EntryId, MutationError, Payload, QueueClass, QueueEntry};
use eatech_edge::db::{DeliveryAttempts, QueueStore, RepositoryError};
use thiserror::Error;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueCommandError {
    /// Queue store operation failed.
    #[error("Queue store error: {0}")]
    Repository(#[from] RepositoryError),

    /// Unknown queue class or invalid payload.
    #[error("{0}")]
    Mutation(#[from] MutationError),

    /// Payload file could not be read.
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Output could not be encoded.
    #[error("Cannot encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Print every entry of `class`, oldest first.
pub async fn list(class: &str) -> Result<(), QueueCommandError> {
    let class: QueueClass = class.parse()?;
    let pool = super::open_store().await?;

    let entries = QueueStore::new(&pool).list_all(class).await?;
    tracing::info!(queue = %class, entries = entries.len(), "Queue listed");
    print_json(&serde_json::to_value(&entries)?);
    Ok(())
}

/// Print the number of pending entries per queue.
pub async fn count() -> Result<(), QueueCommandError> {
    let pool = super::open_store().await?;
    let counts = QueueStore::new(&pool).counts().await?;

    #[allow(clippy::print_stdout)]
    for (class, pending) in counts {
        println!("{class:<16} {pending}");
    }
    Ok(())
}

/// Print dead letters, optionally for one class.
pub async fn dead_letters(class: Option<&str>) -> Result<(), QueueCommandError> {
    let class = class.map(str::parse::<QueueClass>).transpose()?;
    let pool = super::open_store().await?;

    let letters = DeliveryAttempts::new(&pool).dead_letters(class).await?;
    print_json(&serde_json::to_value(&letters)?);
    Ok(())
}

/// Delete every dead letter.
pub async fn purge_dead_letters() -> Result<(), QueueCommandError> {
    let pool = super::open_store().await?;
    let removed = DeliveryAttempts::new(&pool).purge_dead_letters().await?;
    tracing::info!(removed, "Dead letters purged");
    Ok(())
}

/// Validate the JSON payload in `file` and queue it under `class`.
pub async fn enqueue(
    class: &str,
    file: &Path,
    id: Option<String>,
) -> Result<(), QueueCommandError> {
    let class: QueueClass = class.parse()?;
    let body = tokio::fs::read(file)
        .await
        .map_err(|source| QueueCommandError::Io {
            path: file.to_path_buf(),
            source,
        })?;
    let entry = build_entry(class, &body, id)?;

    let pool = super::open_store().await?;
    QueueStore::new(&pool).enqueue(&entry).await?;

    tracing::info!(queue = %class, entry_id = %entry.id, "Mutation queued");
    #[allow(clippy::print_stdout)]
    {
        println!("{}", entry.id);
    }
    Ok(())
}

fn build_entry(
    class: QueueClass,
    body: &[u8],
    id: Option<String>,
) -> Result<QueueEntry, MutationError> {
    let payload = Payload::parse(class, body)?;
    Ok(match id {
        Some(id) => QueueEntry::with_id(EntryId::new(id), payload),
        None => QueueEntry::new(payload),
    })
}

#[allow(clippy::print_stdout)]
fn print_json(value: &serde_json::Value) {
    println!("{value:#}");
}
