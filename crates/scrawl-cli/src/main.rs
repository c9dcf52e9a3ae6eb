//! Scrawl command line interface.

mod commands;
mod error;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{default_db_path, App};

#[derive(Parser)]
#[command(name = "scrawl", about = "Local-first notes with best-effort sync", version)]
struct Cli {
    /// Path to the local notes database.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a new note.
    Add {
        title: String,
        /// Optional note body.
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List notes, pinned first.
    List {
        /// Show archived notes instead of active ones.
        #[arg(long)]
        archived: bool,
        /// Filter by a title/body substring.
        #[arg(long, default_value = "")]
        query: String,
        /// Print notes as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Search note titles and bodies.
    Search {
        query: String,
        #[arg(long)]
        json: bool,
    },
    /// Pin a note to the top of the list.
    Pin {
        id: String,
        /// Unpin instead.
        #[arg(long)]
        off: bool,
    },
    /// Archive a note. Archiving clears any pin.
    Archive {
        id: String,
        /// Restore to the active list instead.
        #[arg(long)]
        off: bool,
    },
    /// Delete a note locally and remotely.
    Delete { id: String },
    /// Run a full reconciliation pass against the remote store.
    Sync,
    /// Show the current user, remote configuration and note counts.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let db_path = cli.db_path.unwrap_or_else(default_db_path);

    match run(&db_path, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(db_path: &Path, command: Command) -> Result<(), error::CliError> {
    let app = App::open(db_path).await?;
    match command {
        Command::Add { title, description } => app.add(&title, description.as_deref()).await,
        Command::List {
            archived,
            query,
            json,
        } => app.list(archived, &query, json).await,
        Command::Search { query, json } => app.search(&query, json).await,
        Command::Pin { id, off } => app.pin(&id, off).await,
        Command::Archive { id, off } => app.archive(&id, off).await,
        Command::Delete { id } => app.delete(&id).await,
        Command::Sync => app.sync().await,
        Command::Status => app.status().await,
    }
}
