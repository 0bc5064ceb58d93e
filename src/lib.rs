//! # ragsync
//!
//! A local-first retrieval-augmented generation library: it keeps a SQLite
//! vector index in sync with directories of documents and answers questions
//! over them, one-shot or as a streaming conversation.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | TOML configuration with validation |
//! | [`scanner`] | Filesystem snapshots and snapshot diffs |
//! | [`chunk`] | Paragraph-aware text chunking with overlap |
//! | [`embedding`] | Embedding providers (Ollama, OpenAI) |
//! | [`llm`] | Language model providers with token streaming |
//! | [`store`] | SQLite-backed vector store |
//! | [`reconcile`] | Index reconciliation against the filesystem |
//! | [`query`] | One-shot retrieval-augmented answering |
//! | [`session`] | Conversational sessions with streaming |
//! | [`engine`] | Top-level facade wiring everything together |
//!
//! ## Example
//!
//! ```no_run
//! use ragsync::config::load_config;
//! use ragsync::engine::RagEngine;
//!
//! # async fn run() -> ragsync::error::Result<()> {
//! let config = load_config(std::path::Path::new("ragsync.toml"))?;
//! let engine = RagEngine::new(config).await?;
//! engine.refresh().await?;
//! let outcome = engine.query("What is the deployment process?", None).await?;
//! println!("{}", outcome.response);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod query;
pub mod reconcile;
pub mod scanner;
pub mod session;
pub mod store;

pub use engine::RagEngine;
pub use error::{Error, Result};
pub use models::{ChatTurn, QueryOutcome, RefreshReport, SourceRef};
pub use session::{ChatEvent, ChatSession, ChatStream};
