//! The remote synchronizer abstraction.

use crate::error::{SyncError, SyncResult};
use crate::settings::ProxyConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tether_protocol::{CommitRef, Mutation, ReconcileResponse, Snapshot};
use tether_store::StoreError;
use tracing::warn;

/// Local and remote disagree and neither continues the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// The effective local snapshot.
    ///
    /// A remote fills this with the pending mutation's snapshot (or an empty
    /// snapshot); the sync loop replaces it with the store's effective
    /// snapshot before the conflict is resolved.
    pub local_snapshot: Snapshot,
    /// The remote head snapshot.
    pub remote_snapshot: Snapshot,
    /// The local commit reference.
    pub local_ref: CommitRef,
    /// The remote head commit reference.
    pub remote_ref: CommitRef,
}

/// The result of one reconciliation against the remote.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The remote is at the local reference and nothing is pending.
    NoChange,
    /// The local side should adopt this remote state.
    FastForwarded {
        /// The snapshot to adopt.
        snapshot: Snapshot,
        /// The reference to adopt.
        commit_ref: CommitRef,
    },
    /// Local and remote histories diverged.
    Diverged(Divergence),
    /// The remote could not be reached or gave an unusable answer.
    Unreachable(SyncError),
    /// Local data could not be read.
    Corrupted(StoreError),
}

impl SyncOutcome {
    /// Returns a short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SyncOutcome::NoChange => "no_change",
            SyncOutcome::FastForwarded { .. } => "fast_forwarded",
            SyncOutcome::Diverged(_) => "diverged",
            SyncOutcome::Unreachable(_) => "unreachable",
            SyncOutcome::Corrupted(_) => "corrupted",
        }
    }

    /// Interprets a wire response to a reconcile request.
    ///
    /// Responses that contradict the request become
    /// `Unreachable(SyncError::Protocol)`, never `Diverged`: a remote that
    /// cannot be understood is treated like one that cannot be reached.
    pub fn from_response(
        local_ref: &CommitRef,
        pending: Option<&Mutation>,
        response: ReconcileResponse,
    ) -> Self {
        let result = match response {
            ReconcileResponse::UpToDate { head } => {
                if &head != local_ref {
                    Err(format!("up-to-date response names foreign head {head}"))
                } else if pending.is_some() {
                    Err("up-to-date response ignored the pending mutation".to_string())
                } else {
                    Ok(SyncOutcome::NoChange)
                }
            }
            ReconcileResponse::Accepted { head, snapshot } => {
                if pending.is_none() {
                    Err("accepted response without a pending mutation".to_string())
                } else {
                    Ok(SyncOutcome::FastForwarded {
                        snapshot,
                        commit_ref: head,
                    })
                }
            }
            ReconcileResponse::FastForward { head, snapshot } => {
                if pending.is_some() {
                    Err("fast-forward response would discard the pending mutation".to_string())
                } else {
                    Ok(SyncOutcome::FastForwarded {
                        snapshot,
                        commit_ref: head,
                    })
                }
            }
            ReconcileResponse::Diverged { head, snapshot } => {
                if &head == local_ref {
                    Err("diverged response names the local head".to_string())
                } else {
                    Ok(SyncOutcome::Diverged(Divergence {
                        local_snapshot: pending.map(|m| m.snapshot.clone()).unwrap_or_default(),
                        remote_snapshot: snapshot,
                        local_ref: local_ref.clone(),
                        remote_ref: head,
                    }))
                }
            }
            ReconcileResponse::Rejected { message } => {
                return SyncOutcome::Unreachable(SyncError::ServerError(message));
            }
        };

        result.unwrap_or_else(|message| {
            warn!(kind = "protocol", commit_ref = %local_ref, %message, "invalid reconcile response");
            SyncOutcome::Unreachable(SyncError::Protocol(message))
        })
    }
}

/// Reconciles the local commit reference against a remote authority.
///
/// Implementations never return an error from `reconcile`: every failure is
/// an [`SyncOutcome::Unreachable`] so the sync loop can account for it.
#[async_trait]
pub trait RemoteSynchronizer: Send + Sync {
    /// Reconciles `local_ref` and the optional pending mutation.
    async fn reconcile(&self, local_ref: &CommitRef, pending: Option<&Mutation>) -> SyncOutcome;

    /// Force-pushes `snapshot`, replacing the remote head if it is still
    /// `expected_remote`. Returns the reference the remote assigned.
    async fn overwrite(&self, snapshot: &Snapshot, expected_remote: &CommitRef)
        -> SyncResult<CommitRef>;

    /// Reconfigures the transport proxy.
    fn configure_proxy(&self, _proxy: Option<&ProxyConfig>) {}
}

#[async_trait]
impl<R: RemoteSynchronizer + ?Sized> RemoteSynchronizer for Arc<R> {
    async fn reconcile(&self, local_ref: &CommitRef, pending: Option<&Mutation>) -> SyncOutcome {
        (**self).reconcile(local_ref, pending).await
    }

    async fn overwrite(
        &self,
        snapshot: &Snapshot,
        expected_remote: &CommitRef,
    ) -> SyncResult<CommitRef> {
        (**self).overwrite(snapshot, expected_remote).await
    }

    fn configure_proxy(&self, proxy: Option<&ProxyConfig>) {
        (**self).configure_proxy(proxy)
    }
}
