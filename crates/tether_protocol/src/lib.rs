//! # Tether Protocol
//!
//! Shared types and wire messages for Tether synchronization.
//!
//! This crate provides:
//! - [`CommitRef`], the opaque version token identifying a synchronized state
//! - [`Snapshot`] and [`Mutation`] payload types
//! - Protocol messages for reconcile and overwrite exchanges
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod commit;
mod error;
mod messages;
mod snapshot;

pub use codec::{from_cbor, to_cbor};
pub use commit::CommitRef;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    OverwriteRequest, OverwriteResponse, ReconcileRequest, ReconcileResponse, OVERWRITE_PATH,
    PROTOCOL_VERSION, RECONCILE_PATH,
};
pub use snapshot::{Mutation, Snapshot};
