//! Error types for the sync server.

use tether_protocol::{CommitRef, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A snapshot exceeds the configured limit.
    #[error("snapshot too large: {size} bytes exceeds limit of {limit}")]
    SnapshotTooLarge {
        /// Snapshot size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// An overwrite expected a head the server no longer has.
    #[error("head moved: expected {expected}, actual {actual}")]
    HeadMoved {
        /// Head the client expected.
        expected: CommitRef,
        /// Current head.
        actual: CommitRef,
    },

    /// Protocol version mismatch.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// Unknown endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServerError::Internal(_))
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::VersionMismatch { .. } => ServerError::ProtocolMismatch(err.to_string()),
            ProtocolError::Encode(message) => ServerError::Internal(message),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}
