//! Observable state of the sync loop.

use crate::resolver::ConflictAction;
use std::fmt;
use std::time::{Duration, Instant};
use tether_protocol::{CommitRef, Snapshot};
use tether_store::StoredState;
use uuid::Uuid;

/// The current state of the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No sync in flight.
    Idle,
    /// A reconcile call is in flight.
    Syncing,
    /// A divergence is being resolved.
    ConflictPending,
    /// Offline; retries on the next trigger.
    OfflineSoft,
    /// Offline until explicitly cleared.
    OfflineHard,
}

impl LoopState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, LoopState::Syncing | LoopState::ConflictPending)
    }

    /// Returns true if the loop is offline.
    pub fn is_offline(&self) -> bool {
        matches!(self, LoopState::OfflineSoft | LoopState::OfflineHard)
    }

    /// Returns true if a trigger may start a cycle from this state.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, LoopState::Idle | LoopState::OfflineSoft)
    }
}

/// Why the engine is offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineReason {
    /// The remote could not be reached.
    Unreachable(String),
    /// A conflict was left unresolved.
    ConflictDeferred,
    /// The local store is corrupted.
    Corrupted(String),
    /// The local store failed without being corrupted.
    StoreUnavailable(String),
    /// The offline prompter declined to keep working offline.
    Declined,
}

impl fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OfflineReason::Unreachable(cause) => write!(f, "remote unreachable: {cause}"),
            OfflineReason::ConflictDeferred => f.write_str("conflict deferred"),
            OfflineReason::Corrupted(cause) => write!(f, "local data corrupted: {cause}"),
            OfflineReason::StoreUnavailable(cause) => write!(f, "local store unavailable: {cause}"),
            OfflineReason::Declined => f.write_str("offline work declined"),
        }
    }
}

/// Whether the engine is in contact with the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    /// Synchronizing normally.
    Online,
    /// Serving local data only.
    Offline(OfflineReason),
}

impl SyncMode {
    /// Returns true if online.
    pub fn is_online(&self) -> bool {
        matches!(self, SyncMode::Online)
    }
}

/// Loop state and mode, published together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// The loop state.
    pub state: LoopState,
    /// The sync mode.
    pub mode: SyncMode,
}

impl EngineStatus {
    pub(crate) fn idle() -> Self {
        Self {
            state: LoopState::Idle,
            mode: SyncMode::Online,
        }
    }
}

/// What asked for a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The periodic timer fired.
    Timer,
    /// The user asked for a sync.
    Manual {
        /// Whether failure must not be treated as optional.
        required: bool,
    },
    /// Settings re-enabled sync.
    SettingsChanged,
    /// The network came back.
    ConnectivityRegained,
}

impl Trigger {
    /// Returns true if failures of the resulting cycle are not optional.
    pub fn is_required(&self) -> bool {
        matches!(self, Trigger::Manual { required: true })
    }

    fn rank(&self) -> u8 {
        match self {
            Trigger::Timer => 0,
            Trigger::SettingsChanged => 1,
            Trigger::ConnectivityRegained => 2,
            Trigger::Manual { .. } => 3,
        }
    }

    /// Combines two triggers waiting for the same cycle. A required manual
    /// trigger always survives.
    pub fn merge(self, other: Trigger) -> Trigger {
        if self.is_required() || other.is_required() {
            Trigger::Manual { required: true }
        } else if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that reached the remote and finished.
    pub cycles_completed: u64,
    /// Fast-forwards adopted.
    pub fast_forwards: u64,
    /// Divergences encountered.
    pub conflicts: u64,
    /// Divergences left unresolved.
    pub conflicts_deferred: u64,
    /// Unreachable cycles.
    pub failures: u64,
    /// Unreachable cycles since the last success.
    pub consecutive_failures: u32,
    /// Corruptions detected.
    pub corruptions: u64,
    /// Last successful sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Local and remote already agreed.
    NoChange,
    /// The remote state was adopted.
    FastForwarded {
        /// The adopted reference.
        commit_ref: CommitRef,
    },
    /// A divergence was settled.
    Resolved {
        /// The action taken.
        action: ConflictAction,
        /// The reference adopted.
        commit_ref: CommitRef,
    },
    /// A divergence was left for later.
    Deferred,
    /// The remote could not be reached.
    Unreachable {
        /// Cause.
        message: String,
    },
    /// Local data is corrupted.
    Corrupted {
        /// Cause.
        message: String,
    },
    /// The local store failed without being corrupted.
    StoreFailed {
        /// Cause.
        message: String,
    },
    /// Shutdown interrupted the cycle.
    Cancelled,
}

/// Result of a sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// How the cycle ended.
    pub outcome: CycleOutcome,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Returns true if the cycle left local and remote in agreement.
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            CycleOutcome::NoChange
                | CycleOutcome::FastForwarded { .. }
                | CycleOutcome::Resolved { .. }
        )
    }
}

/// Read-only view of the local data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalView {
    /// The effective snapshot: pending changes included.
    pub snapshot: Snapshot,
    /// The last synchronized reference, `None` if the store could not be read.
    pub commit_ref: Option<CommitRef>,
    /// Id of the unacknowledged local change, if any.
    pub pending: Option<Uuid>,
}

impl LocalView {
    /// The view of a store that could not be read.
    pub fn unavailable() -> Self {
        Self {
            snapshot: Snapshot::empty(),
            commit_ref: None,
            pending: None,
        }
    }

    /// Returns true if local changes await synchronization.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl From<&StoredState> for LocalView {
    fn from(state: &StoredState) -> Self {
        Self {
            snapshot: state.effective_snapshot().clone(),
            commit_ref: Some(state.commit_ref.clone()),
            pending: state.pending.as_ref().map(|m| m.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::Mutation;

    #[test]
    fn loop_state_predicates() {
        assert!(LoopState::Syncing.is_active());
        assert!(LoopState::ConflictPending.is_active());
        assert!(!LoopState::OfflineSoft.is_active());

        assert!(LoopState::Idle.can_start_sync());
        assert!(LoopState::OfflineSoft.can_start_sync());
        assert!(!LoopState::OfflineHard.can_start_sync());
        assert!(LoopState::OfflineHard.is_offline());
    }

    #[test]
    fn required_trigger_survives_merge() {
        let required = Trigger::Manual { required: true };
        assert_eq!(Trigger::Timer.merge(required), required);
        assert_eq!(required.merge(Trigger::ConnectivityRegained), required);
        assert_eq!(
            Trigger::Timer.merge(Trigger::ConnectivityRegained),
            Trigger::ConnectivityRegained
        );
        assert_eq!(
            Trigger::Manual { required: false }.merge(Trigger::Timer),
            Trigger::Manual { required: false }
        );
    }

    #[test]
    fn view_shows_effective_snapshot() {
        let mut state = StoredState::new(Snapshot::from(b"synced".as_slice()), CommitRef::generate());
        let view = LocalView::from(&state);
        assert_eq!(view.snapshot.as_bytes(), b"synced");
        assert!(!view.has_pending());

        let mutation = Mutation::new(Snapshot::from(b"edited".as_slice()));
        let id = mutation.id;
        state.pending = Some(mutation);
        let view = LocalView::from(&state);
        assert_eq!(view.snapshot.as_bytes(), b"edited");
        assert_eq!(view.pending, Some(id));
        assert_eq!(view.commit_ref, Some(state.commit_ref.clone()));
    }

    #[test]
    fn offline_reason_display() {
        assert_eq!(OfflineReason::ConflictDeferred.to_string(), "conflict deferred");
        assert_eq!(
            OfflineReason::Unreachable("timeout".into()).to_string(),
            "remote unreachable: timeout"
        );
    }
}
