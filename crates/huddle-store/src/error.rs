use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored value no longer parses (identifier, timestamp, size).
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The blocking database task panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(String),

    /// The store did not answer within the configured deadline.
    #[error("Store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backing store refused the call (in-memory store switched off).
    #[error("Store unavailable")]
    Unavailable,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
