//! # Tether Sync Engine
//!
//! Offline-first synchronization for a single locally stored snapshot.
//!
//! This crate provides:
//! - The sync loop (idle → syncing → conflict pending / offline)
//! - Remote synchronizer abstraction with HTTP, loopback and mock remotes
//! - Conflict resolution through injected prompt collaborators
//! - Retry with exponential backoff and offline escalation
//! - Reactive settings
//!
//! ## Architecture
//!
//! Each local store is owned by one sync loop task, started with
//! [`SyncEngine::spawn`]. A cycle:
//! 1. Loads the stored snapshot, commit reference and pending mutation
//! 2. Reconciles them against the remote
//! 3. Adopts a fast-forward, resolves a divergence, or goes offline
//! 4. Publishes the new local view and loop state
//!
//! ## Key Invariants
//!
//! - At most one cycle runs at a time; triggers during a cycle coalesce
//! - A snapshot is always saved together with its commit reference
//! - `NoChange` writes nothing
//! - A divergence is never settled without an answer from a prompter
//! - An undecodable remote response counts as unreachable, never as divergence
//! - Corrupted local data stops sync until explicitly cleared
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_store::MemoryStore;
//! use tether_sync_engine::{
//!     Collaborators, ConflictPolicy, ConflictResolver, EngineConfig, MockRemote, Snapshot,
//!     SyncEngine, SyncSettings,
//! };
//!
//! # async fn demo() -> tether_sync_engine::SyncResult<()> {
//! let (_settings_tx, settings_rx) = tokio::sync::watch::channel(SyncSettings::default());
//! let collaborators = Collaborators::new()
//!     .with_resolver(ConflictResolver::with_policy(ConflictPolicy::ServerWins));
//! let engine = SyncEngine::spawn(
//!     MemoryStore::new(),
//!     Arc::new(MockRemote::new()),
//!     collaborators,
//!     EngineConfig::default(),
//!     settings_rx,
//! );
//!
//! engine.apply(|_| Snapshot::from(b"hello".to_vec())).await?;
//! let report = engine.sync_now(false).await?;
//! println!("{:?}", report.outcome);
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod mock;
mod remote;
mod resolver;
mod settings;
mod state;

pub use config::{EngineConfig, RetryConfig};
pub use engine::{EngineHandle, SyncEngine};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpRemote, LoopbackClient, LoopbackServer};
pub use mock::{MockRemote, MockReply, OverwriteCall, ReconcileCall};
pub use remote::{Divergence, RemoteSynchronizer, SyncOutcome};
pub use resolver::{
    prompt_channel, ChannelPrompter, Collaborators, ConflictAction, ConflictPolicy,
    ConflictPrompter, ConflictResolver, ContinueOffline, CorruptionNotifier, LogCorruption,
    OfflinePrompter, PromptQueue, PromptRequest, PromptUnavailable,
};
pub use settings::{ProxyConfig, SettingsChange, SettingsWatcher, SyncSettings};
pub use state::{
    CycleOutcome, CycleReport, EngineStatus, LocalView, LoopState, OfflineReason, SyncMode,
    SyncStats, Trigger,
};
pub use tether_protocol::{CommitRef, Mutation, Snapshot};
