//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::state::{LocalStore, StoredState};
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Inner {
    state: Option<StoredState>,
    saves: u64,
    fail_next_save: bool,
    corrupted: Option<String>,
}

/// An in-memory store.
///
/// This store keeps its state in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral engines that don't need persistence
///
/// Clones share the same state, so a test can hand one clone to an engine
/// and inspect or sabotage the store through another.
///
/// # Example
///
/// ```rust
/// use tether_store::{LocalStore, MemoryStore, StoredState};
///
/// let mut store = MemoryStore::new();
/// let observer = store.clone();
///
/// store.save(&StoredState::cold()).unwrap();
/// assert_eq!(observer.save_count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory store holding an existing state.
    #[must_use]
    pub fn with_state(state: StoredState) -> Self {
        let store = Self::new();
        store.inner.write().state = Some(state);
        store
    }

    /// Returns a copy of the stored state, bypassing corruption injection.
    #[must_use]
    pub fn peek(&self) -> Option<StoredState> {
        self.inner.read().state.clone()
    }

    /// Returns the number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.inner.read().saves
    }

    /// Makes the next save fail with an I/O error, leaving the state unchanged.
    pub fn fail_next_save(&self) {
        self.inner.write().fail_next_save = true;
    }

    /// Makes every load report corruption until [`MemoryStore::repair`].
    pub fn corrupt(&self, reason: impl Into<String>) {
        self.inner.write().corrupted = Some(reason.into());
    }

    /// Clears injected corruption.
    pub fn repair(&self) {
        self.inner.write().corrupted = None;
    }
}

impl LocalStore for MemoryStore {
    fn load(&self) -> StoreResult<Option<StoredState>> {
        let inner = self.inner.read();
        if let Some(reason) = &inner.corrupted {
            return Err(StoreError::corrupted(reason.clone()));
        }
        Ok(inner.state.clone())
    }

    fn save(&mut self, state: &StoredState) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if std::mem::take(&mut inner.fail_next_save) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected save failure",
            )));
        }
        inner.state = Some(state.clone());
        inner.saves += 1;
        Ok(())
    }
}
