//! Durability tests for the file store: reopen after saves and interrupted saves.

use proptest::prelude::*;
use std::fs;
use tempfile::tempdir;
use tether_protocol::{CommitRef, Mutation, Snapshot};
use tether_store::{FileStore, LocalStore, StoreLayout, StoredState};

fn state_from(payload: Vec<u8>, pending: Option<Vec<u8>>) -> StoredState {
    StoredState {
        snapshot: Snapshot::from(payload),
        commit_ref: CommitRef::generate(),
        pending: pending.map(|p| Mutation::new(Snapshot::from(p))),
    }
}

#[test]
fn interrupted_save_after_many_commits() {
    let dir = tempdir().unwrap();
    let mut last = None;
    {
        let mut store = FileStore::open(dir.path()).unwrap();
        for i in 0..5u8 {
            let state = state_from(vec![i; 64], None);
            store.save(&state).unwrap();
            last = Some(state);
        }
        // Blob and temporary HEAD written, rename never happens.
        let staged = store.stage(&state_from(vec![0xEE; 64], None)).unwrap();
        drop(staged);
    }

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.load().unwrap(), last);
}

#[test]
fn leftover_temp_head_is_ignored() {
    let dir = tempdir().unwrap();
    let saved = state_from(b"kept".to_vec(), Some(b"kept+edit".to_vec()));
    {
        let mut store = FileStore::open(dir.path()).unwrap();
        store.save(&saved).unwrap();
    }
    let layout = StoreLayout::new(dir.path());
    fs::write(layout.head_temp_path(), b"half a head").unwrap();

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.load().unwrap(), Some(saved));
}

#[test]
fn truncated_blob_is_reported_not_guessed() {
    let dir = tempdir().unwrap();
    let generation = {
        let mut store = FileStore::open(dir.path()).unwrap();
        store.save(&state_from(vec![3u8; 256], None)).unwrap();
        store.generation()
    };

    let layout = StoreLayout::new(dir.path());
    let blob_path = layout.blob_path(generation);
    let blob = fs::read(&blob_path).unwrap();
    fs::write(&blob_path, &blob[..blob.len() / 2]).unwrap();

    let store = FileStore::open(dir.path()).unwrap();
    let err = store.load().unwrap_err();
    assert!(err.is_corruption(), "unexpected error: {err}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn reopen_yields_last_saved_state(
        payloads in prop::collection::vec(
            (prop::collection::vec(any::<u8>(), 0..512),
             prop::option::of(prop::collection::vec(any::<u8>(), 0..128))),
            1..6,
        )
    ) {
        let dir = tempdir().unwrap();
        let mut expected = None;
        {
            let mut store = FileStore::open(dir.path()).unwrap();
            for (payload, pending) in payloads {
                let state = state_from(payload, pending);
                store.save(&state).unwrap();
                expected = Some(state);
            }
        }

        let store = FileStore::open(dir.path()).unwrap();
        prop_assert_eq!(store.load().unwrap(), expected);
    }
}
