//! # Tether Sync Server
//!
//! Reference sync authority for Tether.
//!
//! This crate provides:
//! - Request handling for the reconcile and overwrite endpoints
//! - A bounded history of commit references for ancestry decisions
//! - An in-process entry point ([`SyncServer::handle_post`]) that HTTP
//!   front ends and loopback clients route raw CBOR bodies through
//!
//! # Protocol
//!
//! A client reconciles its base commit reference and optional pending
//! mutation against the server head:
//! 1. Base is the head and a mutation is pending: the mutation is committed
//! 2. Base is the head and nothing is pending: the client is up to date
//! 3. Base differs and nothing is pending: the client fast-forwards
//! 4. Base differs and a mutation is pending: the client has diverged
//!
//! A diverged client settles the conflict either by adopting the head or by
//! overwriting it, which succeeds only while the head is the one it saw.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod history;
mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use history::ServerHistory;
pub use server::SyncServer;
