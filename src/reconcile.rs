//! Index reconciliation.
//!
//! Brings the persisted vector collection into agreement with the current
//! filesystem state: scan → diff → upsert added/modified documents, remove
//! deleted ones. Each document reconciles independently; a failure rolls
//! that document back, leaves its old entries and snapshot row untouched,
//! and is reported without aborting the batch, so the document stays
//! pending for the next run.

use std::sync::Arc;
use tracing::{info, warn};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, EmbeddingConfig, IndexConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{DocSignature, RefreshReport, SnapshotDiff};
use crate::scanner;
use crate::store::VectorStore;

pub struct Reconciler {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    index: IndexConfig,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
        index: IndexConfig,
        chunking: ChunkingConfig,
        embedding: &EmbeddingConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            chunking,
            batch_size: embedding.batch_size.max(1),
        }
    }

    /// Scan and diff without touching the index.
    pub async fn plan(&self) -> Result<SnapshotDiff> {
        let previous = self.store.load_snapshot().await?;
        let current = scanner::scan(&self.index)?;
        Ok(scanner::diff(&previous, &current))
    }

    /// Reconcile the index with the filesystem.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let previous = self.store.load_snapshot().await?;
        let current = scanner::scan(&self.index)?;
        let diff = scanner::diff(&previous, &current);

        let mut report = RefreshReport {
            unchanged: (current.len() - diff.added.len() - diff.modified.len()) as u64,
            ..Default::default()
        };

        for path in diff.added.iter().chain(diff.modified.iter()) {
            let Some(signature) = current.get(path) else {
                continue;
            };
            match self.reconcile_document(path, signature).await {
                Ok(chunk_count) => {
                    report.chunks_written += chunk_count;
                    if diff.added.contains(path) {
                        report.added += 1;
                    } else {
                        report.modified += 1;
                    }
                }
                Err(e) => {
                    warn!("failed to reconcile {}: {}", path, e);
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        for path in &diff.deleted {
            self.store.delete_document(path).await?;
            report.deleted += 1;
            info!("removed deleted document {}", path);
        }

        self.heal_orphans(&mut report).await?;

        Ok(report)
    }

    /// Wipe the collection and reindex everything from scratch.
    pub async fn rebuild(&self) -> Result<RefreshReport> {
        self.store.clear().await?;
        self.refresh().await
    }

    /// Chunk, embed, and write one document. The store write and snapshot
    /// commit share a transaction, so any failure leaves the old state.
    async fn reconcile_document(&self, path: &str, signature: &DocSignature) -> Result<u64> {
        let body = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("cannot read {}: {}", path, e)))?;

        let chunks = chunk_text(path, &body, self.chunking.chunk_size, self.chunking.chunk_overlap);

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| Error::Embedding(format!("{}: {}", path, e)))?;
            if batch_vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "{}: provider returned {} vectors for {} chunks",
                    path,
                    batch_vectors.len(),
                    batch.len()
                )));
            }
            vectors.extend(batch_vectors);
        }

        self.store
            .replace_document(path, signature, &chunks, &vectors)
            .await?;

        Ok(chunks.len() as u64)
    }

    /// Surface and self-heal index entries whose source document is absent
    /// from the snapshot, treating each orphan as deleted.
    async fn heal_orphans(&self, report: &mut RefreshReport) -> Result<()> {
        let snapshot = self.store.load_snapshot().await?;
        let orphans = self.store.orphan_sources(&snapshot).await?;
        for path in orphans {
            warn!(
                "{}",
                Error::IndexConsistency(format!(
                    "index entry references {} which is absent from the snapshot; removing",
                    path
                ))
            );
            self.store.delete_document(&path).await?;
            report.deleted += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Deterministic embedder: the vector is a letter histogram, so similar
    /// texts score close together without any network calls.
    struct FakeEmbedder {
        fail: AtomicBool,
    }

    impl FakeEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Embedding("fake provider down".into()));
            }
            Ok(texts.iter().map(|t| embed_deterministic(t)).collect())
        }
    }

    fn embed_deterministic(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        v
    }

    fn index_config(dir: &Path) -> IndexConfig {
        IndexConfig {
            dirs: vec![dir.to_path_buf()],
            recursive: true,
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec![],
        }
    }

    async fn setup(tmp: &TempDir, embedder: Arc<dyn EmbeddingProvider>) -> (Reconciler, VectorStore) {
        let storage = StorageConfig {
            data_dir: tmp.path().join("data"),
            collection: "test".to_string(),
        };
        let store = VectorStore::open(&storage).await.unwrap();
        let embedding = EmbeddingConfig {
            provider: "ollama".into(),
            model: "fake".into(),
            dims: None,
            base_url: String::new(),
            batch_size: 8,
            max_retries: 0,
            timeout_secs: 5,
        };
        let docs = tmp.path().join("docs");
        fs::create_dir_all(&docs).unwrap();
        let reconciler = Reconciler::new(
            store.clone(),
            embedder,
            index_config(&docs),
            ChunkingConfig {
                chunk_size: 1024,
                chunk_overlap: 20,
            },
            &embedding,
        );
        (reconciler, store)
    }

    #[tokio::test]
    async fn test_refresh_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let (reconciler, store) = setup(&tmp, FakeEmbedder::new()).await;
        let docs = tmp.path().join("docs");

        fs::write(docs.join("a.txt"), "Paris is the capital of France").unwrap();
        fs::write(docs.join("b.txt"), "Berlin is the capital of Germany").unwrap();

        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(report.deleted, 0);
        assert!(report.failed.is_empty());

        // Round-trip: a query matching a.txt's content surfaces a.txt.
        let qvec = embed_deterministic("What is the capital of France?");
        let results = store.query(&qvec, 2).await.unwrap();
        assert!(results[0].score > 0.0);
        assert!(results.iter().any(|r| r.path.ends_with("a.txt")));

        // Modify one file, delete the other.
        fs::write(docs.join("a.txt"), "Paris is still the capital of France, unchanged in spirit").unwrap();
        fs::remove_file(docs.join("b.txt")).unwrap();

        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.modified, 1);
        assert_eq!(report.deleted, 1);

        // Deletion: no result references b.txt any more.
        let results = store.query(&qvec, 10).await.unwrap();
        assert!(results.iter().all(|r| !r.path.ends_with("b.txt")));
    }

    #[tokio::test]
    async fn test_refresh_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (reconciler, _store) = setup(&tmp, FakeEmbedder::new()).await;
        let docs = tmp.path().join("docs");
        fs::write(docs.join("a.txt"), "alpha content").unwrap();

        let first = reconciler.refresh().await.unwrap();
        assert_eq!(first.added, 1);

        let second = reconciler.refresh().await.unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.modified, 0);
        assert_eq!(second.deleted, 0);
        assert_eq!(second.chunks_written, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn test_failed_document_stays_pending() {
        let tmp = TempDir::new().unwrap();
        let embedder = FakeEmbedder::new();
        let (reconciler, store) = setup(&tmp, embedder.clone()).await;
        let docs = tmp.path().join("docs");
        fs::write(docs.join("a.txt"), "alpha").unwrap();

        embedder.fail.store(true, Ordering::SeqCst);
        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.ends_with("a.txt"));
        assert!(store.load_snapshot().await.unwrap().is_empty());

        // Provider recovers; the document is retried as added.
        embedder.fail.store(false, Ordering::SeqCst);
        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.added, 1);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_failed_modification_keeps_old_entries() {
        let tmp = TempDir::new().unwrap();
        let embedder = FakeEmbedder::new();
        let (reconciler, store) = setup(&tmp, embedder.clone()).await;
        let docs = tmp.path().join("docs");
        fs::write(docs.join("a.txt"), "original body").unwrap();

        reconciler.refresh().await.unwrap();
        let before = store.load_snapshot().await.unwrap();

        fs::write(docs.join("a.txt"), "modified body with more words").unwrap();
        embedder.fail.store(true, Ordering::SeqCst);
        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.failed.len(), 1);

        // Old snapshot row and chunks survive the failed modification.
        let after = store.load_snapshot().await.unwrap();
        assert_eq!(before, after);
        assert_eq!(store.stats().await.unwrap().chunks, 1);
    }

    #[tokio::test]
    async fn test_rebuild_reindexes_from_scratch() {
        let tmp = TempDir::new().unwrap();
        let (reconciler, store) = setup(&tmp, FakeEmbedder::new()).await;
        let docs = tmp.path().join("docs");
        fs::write(docs.join("a.txt"), "alpha").unwrap();

        reconciler.refresh().await.unwrap();
        let report = reconciler.rebuild().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(store.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_orphans_are_healed() {
        let tmp = TempDir::new().unwrap();
        let (reconciler, store) = setup(&tmp, FakeEmbedder::new()).await;
        let docs = tmp.path().join("docs");
        fs::write(docs.join("a.txt"), "alpha").unwrap();
        reconciler.refresh().await.unwrap();

        // Fabricate an orphan: chunks without a snapshot row.
        let chunks = chunk_text("/ghost.txt", "spooky", 1024, 0);
        store
            .replace_document(
                "/ghost.txt",
                &DocSignature {
                    size: 1,
                    mtime: 1,
                    content_hash: "h".into(),
                },
                &chunks,
                &[vec![1.0]],
            )
            .await
            .unwrap();
        sqlx::query("DELETE FROM snapshot_docs WHERE path = '/ghost.txt'")
            .execute(&store.pool)
            .await
            .unwrap();

        let report = reconciler.refresh().await.unwrap();
        assert_eq!(report.deleted, 1);
        let snapshot = store.load_snapshot().await.unwrap();
        assert!(store.orphan_sources(&snapshot).await.unwrap().is_empty());
    }
}
