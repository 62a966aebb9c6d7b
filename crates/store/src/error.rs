//! Error types for the key-value store.

use thiserror::Error;

/// Errors raised by store transactions and persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while preparing the storage directory.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedded database rejected a statement or transaction.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Conditional insert found an existing value.
    #[error("key already exists: {0}")]
    KeyExists(String),
}
