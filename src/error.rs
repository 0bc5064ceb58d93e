//! Error kinds shared across the crate.
//!
//! Collaborator failures ([`Error::Embedding`], [`Error::Generation`]) are
//! caught at document or query granularity and reported with the failing
//! identity; configuration and session-misuse errors propagate immediately
//! to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing configuration. Fatal, surfaced before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unreadable file or directory.
    #[error("io error: {0}")]
    Io(String),

    /// Vector store / database failure.
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Embedding provider call failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Language-model provider call failed.
    #[error("generation error: {0}")]
    Generation(String),

    /// A second stream was requested while one is still active on the session.
    #[error("a chat stream is already active on this session")]
    ConcurrentStream,

    /// Index entry references a document absent from the snapshot.
    #[error("index consistency: {0}")]
    IndexConsistency(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
