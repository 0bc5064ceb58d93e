//! # ragsync CLI
//!
//! The `ragsync` binary keeps a local SQLite vector index in sync with
//! configured document directories and answers questions over it.
//!
//! ## Usage
//!
//! ```bash
//! ragsync --config ./ragsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragsync init` | Create the SQLite database and run schema migrations |
//! | `ragsync refresh` | Reconcile the index with the configured directories |
//! | `ragsync refresh --dry-run` | Show what a refresh would change, without writing |
//! | `ragsync refresh --rebuild` | Wipe the collection and reindex from scratch |
//! | `ragsync query "<text>"` | One-shot retrieval-augmented answer |
//! | `ragsync chat "<text>"` | Streamed answer, tokens printed as they arrive |
//! | `ragsync retrieve "<text>"` | Similarity search only, no generation |
//! | `ragsync stats` | Index summary: documents, chunks, vectors |

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ragsync::config::{self, Config};
use ragsync::engine::RagEngine;
use ragsync::models::SnapshotDiff;
use ragsync::session::ChatEvent;
use ragsync::store::VectorStore;

/// ragsync — keep a local vector index in sync with your documents and
/// ask questions over them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragsync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragsync",
    about = "Local-first retrieval-augmented generation over your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./ragsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Reconcile the index with the configured directories.
    ///
    /// Scans the directories, diffs against the stored snapshot, and
    /// upserts added/modified documents and removes deleted ones. Documents
    /// that fail to embed are reported and retried on the next run.
    Refresh {
        /// Show what would change without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Wipe the collection and reindex everything from scratch.
        #[arg(long)]
        rebuild: bool,
    },

    /// Ask a one-shot question over the index.
    Query {
        /// The question text.
        text: String,

        /// Override the number of chunks retrieved as context.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Ask a question and stream the answer token by token.
    Chat {
        /// The question text.
        text: String,
    },

    /// Similarity search only — print the matching chunks, no generation.
    Retrieve {
        /// The query text.
        text: String,

        /// Override the number of results.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print an index summary: documents, chunks, vectors.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            run_init(&cfg).await?;
        }
        Commands::Refresh { dry_run, rebuild } => {
            run_refresh(cfg, dry_run, rebuild).await?;
        }
        Commands::Query { text, top_k } => {
            let engine = RagEngine::new(cfg).await?;
            let outcome = engine.query(&text, top_k).await?;
            println!("{}", outcome.response);
            print_sources(&outcome.sources);
            engine.close().await;
        }
        Commands::Chat { text } => {
            run_chat(cfg, &text).await?;
        }
        Commands::Retrieve { text, top_k } => {
            let engine = RagEngine::new(cfg).await?;
            let sources = engine.retrieve(&text, top_k).await?;
            if sources.is_empty() {
                println!("No results.");
            }
            for (i, s) in sources.iter().enumerate() {
                println!("{}. [{:.4}] {}#{}", i + 1, s.score, s.path, s.chunk_index);
                println!("   {}", s.excerpt.replace('\n', " "));
            }
            engine.close().await;
        }
        Commands::Stats => {
            let engine = RagEngine::new(cfg).await?;
            let stats = engine.stats().await?;
            println!("ragsync — Index Stats");
            println!("=====================");
            println!();
            println!("  Database:    {}", stats.db_path.display());
            println!("  Collection:  {}", stats.collection);
            println!();
            println!("  Documents:   {}", stats.documents);
            println!("  Chunks:      {}", stats.chunks);
            println!("  Vectors:     {}", stats.vectors);
            engine.close().await;
        }
    }

    Ok(())
}

/// `init` only needs the store: no embedding or LLM provider is contacted.
async fn run_init(cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let store = VectorStore::open(&cfg.storage).await?;
    store.close().await;
    println!("Database initialized successfully.");
    Ok(())
}

async fn run_refresh(cfg: Config, dry_run: bool, rebuild: bool) -> Result<()> {
    let engine = RagEngine::new(cfg).await?;

    if dry_run {
        let diff = engine.plan().await?;
        print_plan(&diff);
        engine.close().await;
        return Ok(());
    }

    let report = if rebuild {
        engine.rebuild().await?
    } else {
        engine.refresh().await?
    };

    println!(
        "Refresh complete: {} added, {} modified, {} deleted, {} unchanged ({} chunks written).",
        report.added, report.modified, report.deleted, report.unchanged, report.chunks_written
    );
    for (path, reason) in &report.failed {
        eprintln!("  failed: {} ({})", path, reason);
    }
    if !report.failed.is_empty() {
        eprintln!(
            "{} document(s) failed and will be retried on the next refresh.",
            report.failed.len()
        );
    }

    engine.close().await;
    Ok(())
}

async fn run_chat(cfg: Config, text: &str) -> Result<()> {
    let engine = RagEngine::new(cfg).await?;
    let session = engine.chat_session();

    let mut stream = session.chat_stream(text).await?;
    let mut stdout = std::io::stdout();
    while let Some(event) = stream.next().await {
        match event? {
            ChatEvent::Token(token) => {
                print!("{}", token);
                stdout.flush()?;
            }
            ChatEvent::Done(outcome) => {
                println!();
                print_sources(&outcome.sources);
            }
        }
    }

    engine.close().await;
    Ok(())
}

fn print_plan(diff: &SnapshotDiff) {
    if diff.is_empty() {
        println!("Index is up to date.");
        return;
    }
    for path in &diff.added {
        println!("  added:    {}", path);
    }
    for path in &diff.modified {
        println!("  modified: {}", path);
    }
    for path in &diff.deleted {
        println!("  deleted:  {}", path);
    }
    println!(
        "{} added, {} modified, {} deleted.",
        diff.added.len(),
        diff.modified.len(),
        diff.deleted.len()
    );
}

fn print_sources(sources: &[ragsync::models::SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for s in sources {
        println!("  [{:.4}] {}#{}", s.score, s.path, s.chunk_index);
    }
}
