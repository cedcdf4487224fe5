//! Storage error types.

use thiserror::Error;

/// Failures while reading or writing persisted settings.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value is not valid JSON for its key.
    #[error("stored value is malformed: {0}")]
    Json(#[from] serde_json::Error),

    /// Creating the data directory failed.
    #[error("data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage setup: {0}")]
    Config(String),

    #[error("schema migration failed: {0}")]
    Migration(String),

    /// Poisoned connection or a storage worker that went away.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
