//! Top-level facade wiring configuration into a working engine.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::Result;
use crate::llm::{create_llm, LanguageModel};
use crate::models::{IndexStats, QueryOutcome, RefreshReport, SnapshotDiff, SourceRef};
use crate::query::QueryEngine;
use crate::reconcile::Reconciler;
use crate::session::ChatSession;
use crate::store::VectorStore;

pub struct RagEngine {
    config: Config,
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
}

impl RagEngine {
    /// Validate the configuration, open the store, and construct providers.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = VectorStore::open(&config.storage).await?;
        let embedder = create_embedder(&config.embedding)?;
        let llm = create_llm(&config.llm)?;
        Ok(Self {
            config,
            store,
            embedder,
            llm,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.index.clone(),
            self.config.chunking.clone(),
            &self.config.embedding,
        )
    }

    fn query_engine(&self) -> QueryEngine {
        QueryEngine::new(
            self.store.clone(),
            self.embedder.clone(),
            self.llm.clone(),
            self.config.retrieval.top_k,
        )
    }

    /// Scan and diff without writing anything.
    pub async fn plan(&self) -> Result<SnapshotDiff> {
        self.reconciler().plan().await
    }

    /// Reconcile the index with the configured directories.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        self.reconciler().refresh().await
    }

    /// Drop the collection and reindex from scratch.
    pub async fn rebuild(&self) -> Result<RefreshReport> {
        self.reconciler().rebuild().await
    }

    /// One-shot retrieval-augmented answer.
    pub async fn query(&self, query: &str, top_k: Option<usize>) -> Result<QueryOutcome> {
        self.query_engine().query(query, top_k).await
    }

    /// Similarity search only, no generation.
    pub async fn retrieve(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SourceRef>> {
        self.query_engine().retrieve(query, top_k).await
    }

    /// Start a fresh conversational session over the index.
    pub fn chat_session(&self) -> ChatSession {
        ChatSession::new(
            self.store.clone(),
            self.embedder.clone(),
            self.llm.clone(),
            self.config.retrieval.top_k,
        )
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        self.store.stats().await
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
