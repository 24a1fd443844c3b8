//! Error types for protocol encoding and validation.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or validating protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A value could not be encoded to CBOR.
    #[error("encode error: {0}")]
    Encode(String),

    /// Bytes could not be decoded into the expected structure.
    #[error("decode error: {0}")]
    Decode(String),

    /// A commit reference failed validation.
    #[error("invalid commit reference: {0}")]
    InvalidCommitRef(String),

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: local={local}, remote={remote}")]
    VersionMismatch {
        /// Local protocol version.
        local: u16,
        /// Remote protocol version.
        remote: u16,
    },
}

impl ProtocolError {
    /// Creates a decode error for a structurally invalid message.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}
