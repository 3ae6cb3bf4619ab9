use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unreadable file {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Vector dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("HuggingFace API error: {0}")]
    HuggingFace(#[from] hf_hub::api::sync::ApiError),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),
}

impl Error {
    /// Whether this error came from the in-memory index rather than the store or a file.
    pub fn is_index_inconsistency(&self) -> bool {
        matches!(self, Error::Index(_) | Error::DimensionMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Wrap a redb error with a short description of the failed step.
pub(crate) fn db_err<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> Error {
    move |e| Error::Database(format!("{}: {}", context, e))
}
