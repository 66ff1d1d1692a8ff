//! Error types for setkontext.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for setkontext operations.
///
/// The first four variants are the recovery-relevant taxonomy: fetch and
/// extraction errors recover per document, `NoMatch` is a normal query
/// outcome the caller turns into a message, and `StoreCorrupt` is fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// GitHub (or git) could not be reached or refused the credentials.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The LLM returned output that does not match the expected schema.
    /// Recoverable — the document is skipped and the batch continues.
    /// (Named `source_id`: thiserror reserves `source` for the cause chain.)
    #[error("malformed extraction output for {source_id}: {detail}")]
    ExtractionMalformed { source_id: String, detail: String },

    /// No stored rows met the relevance threshold for a query.
    #[error("no stored decisions matched the query")]
    NoMatch,

    /// The database file exists but cannot be opened or read.
    #[error("database at {path} is unreadable ({detail}); delete it and re-run 'setkontext extract'")]
    StoreCorrupt { path: PathBuf, detail: String },

    /// Another extraction run holds the write lock.
    #[error("another extraction run is in progress (pid {0}); wait for it or delete the stale lock row")]
    RunLocked(i64),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anthropic API failure after retries.
    #[error("Anthropic API error: {0}")]
    Api(String),

    /// Database error.
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
