//! Error types for the sync engine.

use tether_protocol::ProtocolError;
use tether_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote sent a response that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote rejected the request.
    #[error("server error: {0}")]
    ServerError(String),

    /// The remote did not answer in time.
    #[error("operation timed out")]
    Timeout,

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The operation was cancelled by shutdown.
    #[error("sync cancelled")]
    Cancelled,

    /// Settings or configuration could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// No prompt collaborator could answer.
    #[error("prompt unavailable: {0}")]
    PromptUnavailable(String),

    /// Synchronization is disabled by settings.
    #[error("sync is disabled")]
    Disabled,

    /// The engine is offline and needs explicit intervention.
    #[error("sync is offline until cleared: {0}")]
    OfflineHard(String),

    /// The engine task has stopped.
    #[error("sync engine has stopped")]
    EngineStopped,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Protocol(_) => true,
            SyncError::Timeout => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error means the remote answered with something
    /// that could not be decoded.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SyncError::Protocol(_))
    }

    /// Returns true if this error means local data is corrupted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SyncError::Store(e) if e.is_corruption())
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
