//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up stores and the states
//! common test scenarios start from.

use std::path::Path;
use tempfile::TempDir;
use tether_protocol::{CommitRef, Mutation, Snapshot};
use tether_store::{FileStore, LocalStore, StoredState};

/// A file store in a temporary directory, removed on drop.
pub struct TestStore {
    /// The store instance.
    pub store: FileStore,
    /// The temporary directory (kept alive to prevent cleanup).
    dir: TempDir,
}

impl TestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(dir.path()).expect("Failed to open file store");
        Self { store, dir }
    }

    /// Creates a store holding `state`.
    pub fn with_state(state: &StoredState) -> Self {
        let mut fixture = Self::new();
        fixture.store.save(state).expect("Failed to save fixture state");
        fixture
    }

    /// Returns the store directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Closes the store and opens it again, as a restarted process would.
    pub fn reopen(self) -> Self {
        let Self { store, dir } = self;
        drop(store);
        let store = FileStore::open(dir.path()).expect("Failed to reopen file store");
        Self { store, dir }
    }

    /// Returns the stored state, panicking on a load error.
    pub fn stored(&self) -> Option<StoredState> {
        self.store.load().expect("Failed to load fixture state")
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = FileStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::ops::DerefMut for TestStore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.store
    }
}

/// Parses a commit reference, panicking on an invalid token.
pub fn commit(token: &str) -> CommitRef {
    CommitRef::parse(token).expect("Invalid commit token")
}

/// Creates a snapshot holding `text`.
pub fn text_snapshot(text: &str) -> Snapshot {
    Snapshot::from(text.as_bytes().to_vec())
}

/// A synchronized state holding `text` at a reference derived from it.
pub fn sample_state(text: &str) -> StoredState {
    StoredState::new(text_snapshot(text), commit(&format!("ref-{}", text.len())))
}

/// A synchronized state holding `base` with `edit` pending on top.
pub fn state_with_pending(base: &str, edit: &str) -> StoredState {
    let mut state = sample_state(base);
    state.pending = Some(Mutation::new(text_snapshot(edit)));
    state
}

/// Reads every regular file in `dir`, sorted by name.
///
/// Two calls returning equal values mean no file was created, removed or
/// rewritten in between.
pub fn directory_contents(dir: &Path) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push((name, std::fs::read(&path)?));
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fixture() {
        let fixture = TestStore::new();
        assert_eq!(fixture.stored(), None);
        assert!(fixture.path().exists());
    }

    #[test]
    fn test_state_survives_reopen() {
        let state = state_with_pending("base", "edited");
        let fixture = TestStore::with_state(&state).reopen();
        assert_eq!(fixture.stored(), Some(state));
    }

    #[test]
    fn test_directory_contents_tracks_writes() {
        let mut fixture = TestStore::with_state(&sample_state("one"));
        let before = directory_contents(fixture.path()).unwrap();
        assert_eq!(before, directory_contents(fixture.path()).unwrap());

        fixture.save(&sample_state("two")).unwrap();
        assert_ne!(before, directory_contents(fixture.path()).unwrap());
    }

    #[test]
    fn test_sample_states() {
        let state = state_with_pending("a", "b");
        assert_eq!(state.effective_snapshot(), &text_snapshot("b"));
        assert_eq!(state.snapshot, text_snapshot("a"));
    }
}
