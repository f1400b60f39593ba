//! EATECH CLI - Queue store maintenance and manual sync.
//!
//! # Usage
//!
//! ```bash
//! # Create the queue store and apply migrations
//! eatech migrate
//!
//! # Inspect queued mutations
//! eatech queue count
//! eatech queue list orders
//! eatech queue dead-letters analytics
//!
//! # Queue a mutation from a JSON file
//! eatech queue enqueue orders ./order.json
//!
//! # Drain every queue (or one tag) against the configured upstream
//! eatech sync
//! eatech sync sync-orders
//! ```
//!
//! # Commands
//!
//! - `migrate` - Apply queue store migrations
//! - `queue` - Inspect and edit the durable queue
//! - `sync` - Drain queued mutations to the upstream

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "eatech")]
#[command(author, version, about = "EATECH edge operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply queue store migrations
    Migrate,
    /// Inspect and edit the durable queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Drain queued mutations to the upstream
    Sync {
        /// Sync tag to drain (`sync-orders`, `sync-analytics`, `sync-voice-commands`).
        /// Every queue is drained when omitted.
        tag: Option<String>,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List the entries of one queue, oldest first
    List {
        /// Queue class (`orders`, `analytics`, `voice-commands`)
        class: String,
    },
    /// Show the number of pending entries per queue
    Count,
    /// List entries that exhausted their retries
    DeadLetters {
        /// Only show this queue class
        class: Option<String>,
    },
    /// Delete every dead letter
    PurgeDeadLetters,
    /// Queue a mutation read from a JSON file
    Enqueue {
        /// Queue class (`orders`, `analytics`, `voice-commands`)
        class: String,

        /// Path to the JSON payload
        file: PathBuf,

        /// Entry ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Queue { action } => match action {
            QueueAction::List { class } => commands::queue::list(&class).await?,
            QueueAction::Count => commands::queue::count().await?,
            QueueAction::DeadLetters { class } => {
                commands::queue::dead_letters(class.as_deref()).await?;
            }
            QueueAction::PurgeDeadLetters => commands::queue::purge_dead_letters().await?,
            QueueAction::Enqueue { class, file, id } => {
                commands::queue::enqueue(&class, &file, id).await?;
            }
        },
        Commands::Sync { tag } => commands::sync::run(tag.as_deref()).await?,
    }
    Ok(())
}
