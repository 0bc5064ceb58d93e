//! SQLite-backed vector store and snapshot persistence.
//!
//! One database file holds both the document snapshot and the vector
//! collection, keyed by the configured collection name. The store only
//! exposes upsert/delete/query commands; reconciliation decides what to
//! issue. Chunk replacement is delete-then-insert inside one transaction,
//! so a failed write rolls back and leaves the prior entries untouched.

use sqlx::{Row, SqlitePool};
use std::path::PathBuf;

use crate::config::StorageConfig;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::migrate;
use crate::models::{Chunk, DocSignature, IndexStats, Snapshot, SourceRef};

#[derive(Clone)]
pub struct VectorStore {
    pub(crate) pool: SqlitePool,
    collection: String,
    db_path: PathBuf,
}

impl VectorStore {
    /// Open (creating if needed) the store rooted at the configured data dir.
    pub async fn open(storage: &StorageConfig) -> Result<Self> {
        let pool = db::connect(storage).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            collection: storage.collection.clone(),
            db_path: storage.db_path(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Load the current snapshot for this collection.
    pub async fn load_snapshot(&self) -> Result<Snapshot> {
        let rows = sqlx::query(
            "SELECT path, size, mtime, content_hash FROM snapshot_docs WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let path: String = row.get("path");
            let size: i64 = row.get("size");
            snapshot.insert(
                path,
                DocSignature {
                    size: size as u64,
                    mtime: row.get("mtime"),
                    content_hash: row.get("content_hash"),
                },
            );
        }
        Ok(snapshot)
    }

    /// Replace all index entries for one document and commit its snapshot
    /// row, atomically. `vectors` must align one-to-one with `chunks`.
    pub async fn replace_document(
        &self,
        path: &str,
        signature: &DocSignature,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        debug_assert_eq!(chunks.len(), vectors.len());

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ? AND source_path = ?")
            .bind(&self.collection)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE collection = ? AND source_path = ?")
            .bind(&self.collection)
            .bind(path)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                "INSERT INTO chunks (id, collection, source_path, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&self.collection)
            .bind(&chunk.source_path)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, collection, source_path, dims, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&self.collection)
            .bind(&chunk.source_path)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO snapshot_docs (collection, path, size, mtime, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, path) DO UPDATE SET
                size = excluded.size,
                mtime = excluded.mtime,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.collection)
        .bind(path)
        .bind(signature.size as i64)
        .bind(signature.mtime)
        .bind(&signature.content_hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove all index entries and the snapshot row for one document.
    /// Returns the number of chunks removed.
    pub async fn delete_document(&self, path: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ? AND source_path = ?")
            .bind(&self.collection)
            .bind(path)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE collection = ? AND source_path = ?")
            .bind(&self.collection)
            .bind(path)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM snapshot_docs WHERE collection = ? AND path = ?")
            .bind(&self.collection)
            .bind(path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }

    /// Top-K nearest chunks by cosine similarity to the query vector.
    pub async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<SourceRef>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.source_path, cv.embedding, c.chunk_index, c.text
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            WHERE cv.collection = ?
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<SourceRef> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let stored = blob_to_vec(&blob);
                let score = cosine_similarity(vector, &stored);
                let text: String = row.get("text");
                SourceRef {
                    path: row.get("source_path"),
                    chunk_index: row.get("chunk_index"),
                    score,
                    excerpt: excerpt_of(&text),
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        candidates.truncate(top_k);

        Ok(candidates)
    }

    /// Index entries whose source document is absent from the snapshot.
    pub async fn orphan_sources(&self, snapshot: &Snapshot) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT source_path FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("source_path"))
            .filter(|path| !snapshot.contains_key(path))
            .collect())
    }

    /// Wipe all rows for this collection (used by rebuild).
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM snapshot_docs WHERE collection = ?")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let documents: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM snapshot_docs WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        let vectors: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE collection = ?")
                .bind(&self.collection)
                .fetch_one(&self.pool)
                .await?;

        Ok(IndexStats {
            documents,
            chunks,
            vectors,
            collection: self.collection.clone(),
            db_path: self.db_path.clone(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// First 240 characters of a chunk, char-boundary safe.
fn excerpt_of(text: &str) -> String {
    const EXCERPT_CHARS: usize = 240;
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    text.chars().take(EXCERPT_CHARS).collect()
}
