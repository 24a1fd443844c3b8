//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored state is unreadable or inconsistent.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another owner holds the store directory.
    #[error("store is locked by another owner")]
    Locked,

    /// The state could not be encoded for writing.
    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Returns true if this error means the stored data cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corrupted(_))
    }
}
