//! Manual drain of the durable queue.
//!
//! # Usage
//!
//! ```bash
//! # Drain every queue
//! eatech sync
//!
//! # Drain the orders queue only
//! eatech sync sync-orders
//! ```
//!
//! # Environment Variables
//!
//! Reads the same configuration as the edge server. `EATECH_UPSTREAM_URL`
//! is required; `EATECH_API_TOKEN` and the `EATECH_SYNC_*` retry settings
//! apply to the drain.

use std::sync::Arc;

use eatech_core::{MutationError, SyncTag};
use eatech_edge::config::{ConfigError, EdgeConfig};
use eatech_edge::db::{self, RepositoryError};
use eatech_edge::net::{FetchError, HttpFetcher, Upstream};
use eatech_edge::push::{NotificationCenter, NotificationSink};
use eatech_edge::sync::{ConnectivityMonitor, Submitter, SyncCoordinator, SyncError, SyncReport};
use thiserror::Error;

/// Errors that can occur during a manual sync.
#[derive(Debug, Error)]
pub enum SyncCommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue store error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("HTTP client error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Sync failed: {0}")]
    Sync(#[from] SyncError),

    /// Unknown sync tag.
    #[error("{0}")]
    Tag(#[from] MutationError),
}

/// Drain `tag`'s queue, or every queue, and print one line per report.
pub async fn run(tag: Option<&str>) -> Result<(), SyncCommandError> {
    let tag = tag.map(str::parse::<SyncTag>).transpose()?;
    let config = EdgeConfig::from_env()?;

    tracing::info!(upstream = %config.upstream_url, "Connecting to queue store...");
    let pool = db::create_pool(&config.database_url).await?;

    let notifications = Arc::new(NotificationCenter::new());
    let submitter = Submitter::new(
        Arc::new(HttpFetcher::new()?),
        Upstream::new(config.upstream_url.clone()),
        config.api_token.clone(),
    );
    let coordinator = SyncCoordinator::new(
        pool.clone(),
        submitter,
        config.retry,
        ConnectivityMonitor::default(),
        notifications.clone(),
    );

    let reports = match tag {
        Some(tag) => vec![coordinator.sync(tag).await?],
        None => coordinator.sync_all().await?,
    };

    for report in &reports {
        print_report(report);
    }
    for notification in notifications.visible() {
        tracing::info!(title = %notification.title, "Notification raised during sync");
    }

    pool.close().await;
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_report(report: &SyncReport) {
    println!(
        "{:<16} attempted={} delivered={} failed={} deferred={} dead_lettered={}",
        report.class,
        report.attempted,
        report.delivered,
        report.failed,
        report.deferred,
        report.dead_lettered,
    );
}
