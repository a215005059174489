//! Cradle Notes - command line
//!
//! Inspect the link graph of a markdown file or push it through the full
//! ingestion pipeline against an in-memory store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cradle_notes::access::Principal;
use cradle_notes::linker;
use cradle_notes::notes::CreateNoteRequest;
use cradle_notes::{AppState, Config};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "cradle")]
#[command(about = "Knowledge-base note ingestion")]
struct Cli {
    /// Path to a YAML config file (defaults to ./cradle.yaml)
    #[arg(short, long, global = true, env = "CRADLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the relations and links of a markdown file as JSON
    Links {
        /// Markdown file to read
        file: PathBuf,

        /// Merge threshold for link-tree compression (overrides config)
        #[arg(short = 'k', long)]
        max_clique_size: Option<usize>,
    },

    /// Ingest a markdown file and print the resulting note and relations
    Ingest {
        /// Markdown file to read
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cradle_notes=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_yaml_and_env(cli.config.as_deref())?;

    match cli.command {
        Commands::Links {
            file,
            max_clique_size,
        } => {
            let k = max_clique_size.unwrap_or(config.linker.max_clique_size);
            run_links(&file, k)
        }
        Commands::Ingest { file } => run_ingest(config, &file).await,
    }
}

fn read_note(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn run_links(path: &Path, max_clique_size: usize) -> Result<()> {
    let content = read_note(path)?;
    let extraction = linker::extract(&content, max_clique_size)?;
    println!("{}", serde_json::to_string_pretty(&extraction)?);
    Ok(())
}

async fn run_ingest(config: Config, path: &Path) -> Result<()> {
    let content = read_note(path)?;
    let state = AppState::new(config);
    let author = Principal::superuser(Uuid::new_v4());

    let note = state
        .ingestor
        .create_note(&author, CreateNoteRequest { content })
        .await?;
    tracing::info!(note_id = %note.id, "Waiting for background units");
    state.queue.wait_idle().await;

    let note = state
        .store
        .get_note(note.id)
        .await?
        .context("Note disappeared after ingestion")?;
    let relations = state.store.list_note_relations(note.id).await?;
    let entries = state.store.list_entries().await?;

    let output = serde_json::json!({
        "note": note,
        "entries": entries,
        "relations": relations,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    state.queue.shutdown().await;
    Ok(())
}
