//! Driftsync CLI
//!
//! Operator tools for a SQLite replica file.
//!
//! # Commands
//!
//! - `stats` - Pending, failed, and conflict counts
//! - `outbox` - Dump outstanding outbox entries in replay order
//! - `conflicts` - List conflicts
//! - `resolve` - Settle a conflict with the local or remote version
//! - `requeue` - Reset entries stuck in `processing` after a crash

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use driftsync_core::Resolution;
use driftsync_store::{RecordStore, SqliteStore};

/// Inspect and repair a driftsync replica.
#[derive(Parser)]
#[command(name = "driftsync-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica database
    #[arg(global = true, short, long, default_value = "replica.db")]
    db: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Print JSON instead of text
    #[arg(global = true, long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pending, failed, and conflict counts
    Stats,

    /// Dump outstanding outbox entries in replay order
    Outbox {
        /// Only entries whose last push failed
        #[arg(short, long)]
        failed: bool,
    },

    /// List conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(short, long)]
        all: bool,
    },

    /// Settle a conflict
    Resolve {
        /// Conflict id
        id: String,

        /// Which version wins
        #[arg(value_enum)]
        winner: Winner,
    },

    /// Reset entries stuck in `processing` to `pending`
    Requeue,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Winner {
    Local,
    Remote,
}

impl From<Winner> for Resolution {
    fn from(winner: Winner) -> Self {
        match winner {
            Winner::Local => Resolution::LocalWins,
            Winner::Remote => Resolution::RemoteWins,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    anyhow::ensure!(
        cli.db.exists(),
        "replica database {} does not exist",
        cli.db.display()
    );
    let store = SqliteStore::open_discovered(&cli.db)
        .with_context(|| format!("failed to open {}", cli.db.display()))?;
    tracing::debug!(
        db = %cli.db.display(),
        collections = ?store.schema().names(),
        "opened replica"
    );

    match cli.command {
        Commands::Stats => commands::stats(&store, cli.json).await,
        Commands::Outbox { failed } => commands::outbox(&store, failed, cli.json).await,
        Commands::Conflicts { all } => commands::conflicts(&store, all, cli.json).await,
        Commands::Resolve { id, winner } => {
            commands::resolve(&store, &id, winner.into(), cli.json).await
        }
        Commands::Requeue => commands::requeue(&store).await,
    }
}
