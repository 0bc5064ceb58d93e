//! Core data models used throughout ragsync.
//!
//! These types represent the document signatures, snapshots, chunks, and
//! query outcomes that flow through the reconciliation and query paths.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Modification signature of one document on disk.
///
/// Two signatures compare equal only when size, mtime, and content hash all
/// match; any difference classifies the document as modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSignature {
    pub size: u64,
    pub mtime: i64,
    /// SHA-256 of the file body, hex encoded.
    pub content_hash: String,
}

/// Point-in-time mapping from document path to its signature.
///
/// Persisted alongside the vector collection after every successful
/// reconciliation; exactly one snapshot is current per collection.
pub type Snapshot = BTreeMap<String, DocSignature>;

/// Classification of documents between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    /// Paths present in current but not in previous.
    pub added: Vec<String>,
    /// Paths present in both with differing signatures.
    pub modified: Vec<String>,
    /// Paths present in previous but not in current.
    pub deleted: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// A chunk of a document's body text, the unit of embedding and retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// Retrieval metadata for one matched chunk.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub path: String,
    pub chunk_index: i64,
    pub score: f32,
    pub excerpt: String,
}

/// Response plus retrieval metadata for a query or chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub response: String,
    pub sources: Vec<SourceRef>,
}

/// One completed exchange in a chat session, ordered by occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub query: String,
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub at: DateTime<Utc>,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
    pub unchanged: u64,
    pub chunks_written: u64,
    /// Documents that failed to reconcile, with the failure message.
    /// Their old index entries and snapshot rows are left untouched, so
    /// they remain pending for the next run.
    pub failed: Vec<(String, String)>,
}

/// Summary of what the collection currently holds.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub documents: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub collection: String,
    pub db_path: PathBuf,
}
