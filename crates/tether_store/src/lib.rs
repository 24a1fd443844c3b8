//! # Tether Store
//!
//! Durable storage for the locally synchronized snapshot.
//!
//! A store keeps exactly one [`StoredState`]: the last synchronized
//! [`Snapshot`](tether_protocol::Snapshot), the [`CommitRef`] it belongs to,
//! and the pending local [`Mutation`](tether_protocol::Mutation), if any.
//! The three are always saved together.
//!
//! ## Design Principles
//!
//! - `save` is atomic: a failure at any point leaves the previous state loadable
//! - `load` never guesses: damaged files produce [`StoreError::Corrupted`]
//! - A store directory has a single owner, enforced with an advisory lock
//!
//! ## Available Stores
//!
//! - [`FileStore`] - Persistent storage in a directory
//! - [`MemoryStore`] - For testing and ephemeral storage
//!
//! ## Example
//!
//! ```rust
//! use tether_store::{LocalStore, MemoryStore};
//!
//! let mut store = MemoryStore::new();
//! let state = store.load_or_init().unwrap();
//! assert!(state.snapshot.is_empty());
//! assert_eq!(store.load().unwrap(), Some(state));
//! ```
//!
//! [`CommitRef`]: tether_protocol::CommitRef

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod format;
mod memory;
mod state;

pub use error::{StoreError, StoreResult};
pub use file::{FileStore, StagedSave, StoreLayout};
pub use format::{Head, FORMAT_VERSION};
pub use memory::MemoryStore;
pub use state::{LocalStore, StoredState};
