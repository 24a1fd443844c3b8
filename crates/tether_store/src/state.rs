//! The stored state and the store trait.

use crate::error::StoreResult;
use serde::{Deserialize, Serialize};
use tether_protocol::{CommitRef, Mutation, Snapshot};

/// The unit a [`LocalStore`] persists.
///
/// `snapshot` is the last state agreed with the remote at `commit_ref`;
/// `pending` is a local change on top of it that the remote has not
/// acknowledged yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    /// Last synchronized snapshot.
    pub snapshot: Snapshot,
    /// Commit reference of `snapshot`.
    pub commit_ref: CommitRef,
    /// Unacknowledged local change.
    pub pending: Option<Mutation>,
}

impl StoredState {
    /// Creates a state with no pending mutation.
    pub fn new(snapshot: Snapshot, commit_ref: CommitRef) -> Self {
        Self {
            snapshot,
            commit_ref,
            pending: None,
        }
    }

    /// Creates the state of a store that has never synchronized: an empty
    /// snapshot under a freshly generated commit reference.
    pub fn cold() -> Self {
        Self::new(Snapshot::empty(), CommitRef::generate())
    }

    /// Returns the snapshot local readers should see: the pending mutation's
    /// snapshot if there is one, otherwise the synchronized snapshot.
    pub fn effective_snapshot(&self) -> &Snapshot {
        self.pending
            .as_ref()
            .map(|m| &m.snapshot)
            .unwrap_or(&self.snapshot)
    }

    /// Returns true if there is an unacknowledged local change.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Durable storage for a [`StoredState`].
///
/// # Invariants
///
/// - `save` is atomic: after a failed or interrupted save, `load` returns the
///   previously saved state
/// - `load` returns exactly the last successfully saved state
/// - `load` reports damaged data as [`StoreError::Corrupted`] rather than
///   returning partial data
///
/// [`StoreError::Corrupted`]: crate::StoreError::Corrupted
pub trait LocalStore: Send {
    /// Loads the stored state.
    ///
    /// Returns `Ok(None)` if nothing has ever been saved.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the stored data is unreadable, or `Io` if the
    /// underlying storage fails.
    fn load(&self) -> StoreResult<Option<StoredState>>;

    /// Atomically replaces the stored state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state could not be made durable. The previous
    /// state remains readable in that case.
    fn save(&mut self, state: &StoredState) -> StoreResult<()>;

    /// Loads the stored state, initializing a cold state if the store is empty.
    ///
    /// The generated commit reference is persisted before it is returned, so a
    /// store never reports an absent reference twice.
    fn load_or_init(&mut self) -> StoreResult<StoredState> {
        if let Some(state) = self.load()? {
            return Ok(state);
        }
        let state = StoredState::cold();
        self.save(&state)?;
        Ok(state)
    }
}
