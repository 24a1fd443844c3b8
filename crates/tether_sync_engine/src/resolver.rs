//! Conflict resolution and the prompt collaborators.
//!
//! The sync loop never decides a conflict on its own. It asks a
//! [`ConflictPrompter`]; when none can answer, the conflict is deferred and
//! the loop goes offline with both sides intact.

use crate::error::SyncError;
use crate::remote::Divergence;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tether_store::StoreError;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// How to settle a divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Discard local changes and adopt the remote snapshot.
    AcceptServer,
    /// Force-push the local snapshot over the remote head.
    AcceptClient,
    /// Change nothing and stay offline.
    StayOffline,
}

/// No prompt collaborator could answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("prompt unavailable: {0}")]
pub struct PromptUnavailable(pub String);

impl From<PromptUnavailable> for SyncError {
    fn from(err: PromptUnavailable) -> Self {
        SyncError::PromptUnavailable(err.0)
    }
}

/// Asks someone how to settle a divergence.
///
/// A prompt may take arbitrarily long. The sync loop cancels it by dropping
/// the future on shutdown.
#[async_trait]
pub trait ConflictPrompter: Send + Sync {
    /// Returns the chosen action, or `PromptUnavailable` if no answer can be
    /// obtained.
    async fn prompt(&self, divergence: &Divergence) -> Result<ConflictAction, PromptUnavailable>;
}

/// A fixed conflict policy for unattended operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Always adopt the remote snapshot.
    ServerWins,
    /// Always force-push the local snapshot.
    ClientWins,
    /// Nobody is available to decide; conflicts are deferred.
    Manual,
}

#[async_trait]
impl ConflictPrompter for ConflictPolicy {
    async fn prompt(&self, _divergence: &Divergence) -> Result<ConflictAction, PromptUnavailable> {
        match self {
            ConflictPolicy::ServerWins => Ok(ConflictAction::AcceptServer),
            ConflictPolicy::ClientWins => Ok(ConflictAction::AcceptClient),
            ConflictPolicy::Manual => Err(PromptUnavailable(
                "manual resolution required".to_string(),
            )),
        }
    }
}

/// A conflict waiting for an answer.
#[derive(Debug)]
pub struct PromptRequest {
    /// The divergence to settle.
    pub divergence: Divergence,
    responder: oneshot::Sender<ConflictAction>,
}

impl PromptRequest {
    /// Answers the prompt. Returns false if the sync loop stopped waiting.
    pub fn respond(self, action: ConflictAction) -> bool {
        self.responder.send(action).is_ok()
    }
}

/// The UI side of a [`ChannelPrompter`].
#[derive(Debug)]
pub struct PromptQueue {
    rx: mpsc::Receiver<PromptRequest>,
}

impl PromptQueue {
    /// Waits for the next conflict. Returns `None` once the prompter is gone.
    pub async fn next(&mut self) -> Option<PromptRequest> {
        self.rx.recv().await
    }

    /// Returns a waiting conflict without blocking.
    pub fn try_next(&mut self) -> Option<PromptRequest> {
        self.rx.try_recv().ok()
    }
}

/// A prompter that hands each divergence to a UI over a channel.
#[derive(Debug, Clone)]
pub struct ChannelPrompter {
    tx: mpsc::Sender<PromptRequest>,
}

/// Creates a connected prompter and queue.
pub fn prompt_channel(capacity: usize) -> (ChannelPrompter, PromptQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelPrompter { tx }, PromptQueue { rx })
}

#[async_trait]
impl ConflictPrompter for ChannelPrompter {
    async fn prompt(&self, divergence: &Divergence) -> Result<ConflictAction, PromptUnavailable> {
        let (responder, answer) = oneshot::channel();
        let request = PromptRequest {
            divergence: divergence.clone(),
            responder,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| PromptUnavailable("prompt queue closed".to_string()))?;
        answer
            .await
            .map_err(|_| PromptUnavailable("prompt dismissed without an answer".to_string()))
    }
}

/// Settles divergences by consulting the installed prompter.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    prompter: Option<Arc<dyn ConflictPrompter>>,
}

impl ConflictResolver {
    /// Creates a resolver without a prompter; every conflict is deferred.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver that asks `prompter`.
    pub fn with_prompter(prompter: Arc<dyn ConflictPrompter>) -> Self {
        Self {
            prompter: Some(prompter),
        }
    }

    /// Creates a resolver applying a fixed policy.
    pub fn with_policy(policy: ConflictPolicy) -> Self {
        Self::with_prompter(Arc::new(policy))
    }

    /// Decides how to settle `divergence`. Never picks a side when the
    /// prompter cannot answer.
    pub async fn resolve(&self, divergence: &Divergence) -> ConflictAction {
        let Some(prompter) = &self.prompter else {
            warn!(remote_ref = %divergence.remote_ref, "no conflict prompter installed, deferring");
            return ConflictAction::StayOffline;
        };
        match prompter.prompt(divergence).await {
            Ok(action) => action,
            Err(e) => {
                warn!(remote_ref = %divergence.remote_ref, reason = %e, "conflict deferred");
                ConflictAction::StayOffline
            }
        }
    }
}

impl fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("has_prompter", &self.prompter.is_some())
            .finish()
    }
}

/// Asked whether to keep working offline after repeated failures.
#[async_trait]
pub trait OfflinePrompter: Send + Sync {
    /// Returns true to stay in soft offline mode, false to stop syncing until
    /// cleared. When `optional` is false the answer is ignored and the call
    /// only informs.
    async fn prompt_offline(&self, cause: &SyncError, optional: bool) -> bool;
}

/// An offline prompter that always keeps working offline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinueOffline;

#[async_trait]
impl OfflinePrompter for ContinueOffline {
    async fn prompt_offline(&self, cause: &SyncError, optional: bool) -> bool {
        warn!(error = %cause, optional, "remote unreachable, continuing offline");
        true
    }
}

/// Told when local data turns out to be corrupted. Fire-and-forget.
pub trait CorruptionNotifier: Send + Sync {
    /// Reports the corruption.
    fn notify_corrupted(&self, error: &StoreError);
}

/// A corruption notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCorruption;

impl CorruptionNotifier for LogCorruption {
    fn notify_corrupted(&self, err: &StoreError) {
        error!(error = %err, "local store corrupted");
    }
}

/// The injected capabilities of a sync engine.
#[derive(Clone)]
pub struct Collaborators {
    /// Settles divergences.
    pub resolver: ConflictResolver,
    /// Consulted after repeated failures.
    pub offline: Arc<dyn OfflinePrompter>,
    /// Told about corruption.
    pub corruption: Arc<dyn CorruptionNotifier>,
}

impl Collaborators {
    /// Creates collaborators that defer conflicts, keep working offline and
    /// log corruption.
    pub fn new() -> Self {
        Self {
            resolver: ConflictResolver::new(),
            offline: Arc::new(ContinueOffline),
            corruption: Arc::new(LogCorruption),
        }
    }

    /// Sets the conflict resolver.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Sets the offline prompter.
    pub fn with_offline_prompter(mut self, prompter: Arc<dyn OfflinePrompter>) -> Self {
        self.offline = prompter;
        self
    }

    /// Sets the corruption notifier.
    pub fn with_corruption_notifier(mut self, notifier: Arc<dyn CorruptionNotifier>) -> Self {
        self.corruption = notifier;
        self
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}
