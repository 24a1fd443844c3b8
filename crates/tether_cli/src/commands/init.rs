//! Init command implementation.

use std::path::Path;
use tether_store::{FileStore, LocalStore, StoredState};
use tracing::info;

/// Creates a cold store at `path` and returns its state.
///
/// An existing store, readable or not, is only replaced with `force`.
pub fn init(path: &Path, force: bool) -> Result<StoredState, Box<dyn std::error::Error>> {
    let mut store = FileStore::open(path)?;
    let existing = match store.load() {
        Ok(state) => state.is_some(),
        Err(e) if e.is_corruption() => true,
        Err(e) => return Err(e.into()),
    };
    if existing && !force {
        return Err(format!("Store already exists at {:?} (use --force to replace it)", path).into());
    }

    let state = StoredState::cold();
    store.save(&state)?;
    info!(commit_ref = %state.commit_ref, replaced = existing, "store initialized");
    Ok(state)
}

/// Runs the init command.
pub fn run(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let state = init(path, force)?;
    println!("Initialized store at {:?}", path);
    println!("Commit ref: {}", state.commit_ref);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_store::StoreLayout;

    #[test]
    fn init_creates_cold_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");
        let state = init(&path, false).unwrap();

        let (_, stored) = StoreLayout::new(&path).read_state().unwrap().unwrap();
        assert_eq!(stored, state);
        assert!(stored.snapshot.is_empty());
    }

    #[test]
    fn init_refuses_existing_store_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let first = init(dir.path(), false).unwrap();
        assert!(init(dir.path(), false).is_err());

        let second = init(dir.path(), true).unwrap();
        assert_ne!(first.commit_ref, second.commit_ref);
    }

    #[test]
    fn force_replaces_corrupted_store() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), false).unwrap();
        std::fs::write(StoreLayout::new(dir.path()).head_path(), b"garbage").unwrap();

        assert!(init(dir.path(), false).is_err());
        init(dir.path(), true).unwrap();
        assert!(StoreLayout::new(dir.path()).read_state().unwrap().is_some());
    }
}
