//! Crash recovery across arbitrary states, and an engine restarted after a
//! crash mid-sync.

use proptest::prelude::*;
use std::sync::Arc;
use tether_store::{FileStore, LocalStore, StoredState};
use tether_sync_engine::{
    Collaborators, CycleOutcome, EngineConfig, MockRemote, MockReply, SyncEngine, SyncSettings,
};
use tether_testkit::prelude::*;
use tokio::sync::watch;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn every_crash_point_recovers(previous in stored_state_strategy(), next in stored_state_strategy()) {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run_all(&previous, &next);
        prop_assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn crash_during_first_save_reads_empty(next in stored_state_strategy()) {
        let mut harness = CrashRecoveryHarness::with_temp_dir().unwrap();
        harness.run_all_first_save(&next);
        prop_assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn last_save_wins_after_reopen(states in state_sequence_strategy(6)) {
        let mut fixture = TestStore::new();
        for state in &states {
            fixture.save(state).unwrap();
        }
        let fixture = fixture.reopen();
        let stored = fixture.stored();
        prop_assert_eq!(stored.as_ref(), states.last());
        // Superseded blobs are gone.
        prop_assert_eq!(fixture.layout().blob_generations().unwrap().len(), 1);
    }
}

#[tokio::test]
async fn engine_restart_after_crash_mid_sync() {
    let dir = tempfile::tempdir().unwrap();
    let original = state_with_pending("base", "edit");
    let mut store = FileStore::open(dir.path()).unwrap();
    store.save(&original).unwrap();
    let before = directory_contents(dir.path()).unwrap();

    // First run: the fast-forward save never reaches disk.
    let store = CrashableStore::new(store);
    let switch = store.switch();
    switch.crash_after(0);
    let remote = Arc::new(MockRemote::new());
    remote.push_reply(MockReply::FastForward {
        snapshot: text_snapshot("edit"),
        commit_ref: commit("accepted"),
    });
    let (_settings, rx) = watch::channel(SyncSettings::default());
    let engine = SyncEngine::spawn(
        store,
        remote.clone(),
        Collaborators::new(),
        EngineConfig::new().with_sync_on_start(false),
        rx,
    );
    let report = engine.sync_now(false).await.unwrap();
    assert!(matches!(report.outcome, CycleOutcome::StoreFailed { .. }));
    assert!(switch.has_crashed());
    engine.shutdown().await;
    assert_eq!(directory_contents(dir.path()).unwrap(), before);

    // Second run: the pending edit is still there and goes out again.
    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(store.load().unwrap(), Some(original.clone()));
    remote.push_reply(MockReply::FastForward {
        snapshot: text_snapshot("edit"),
        commit_ref: commit("accepted"),
    });
    let (_settings, rx) = watch::channel(SyncSettings::default());
    let engine = SyncEngine::spawn(
        store,
        remote.clone(),
        Collaborators::new(),
        EngineConfig::new().with_sync_on_start(false),
        rx,
    );
    let report = engine.sync_now(false).await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::FastForwarded {
            commit_ref: commit("accepted")
        }
    );
    engine.shutdown().await;

    let calls = remote.reconcile_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].pending, original.pending);
    assert_eq!(calls[1].pending, original.pending);

    let store = FileStore::open(dir.path()).unwrap();
    assert_eq!(
        store.load().unwrap(),
        Some(StoredState::new(text_snapshot("edit"), commit("accepted")))
    );
}

#[tokio::test]
async fn engine_starts_cleanly_after_crash_during_first_init() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut store = FileStore::open(dir.path()).unwrap();
        drop(store.stage(&StoredState::cold()).unwrap());
    }

    let remote = Arc::new(MockRemote::new());
    let (_settings, rx) = watch::channel(SyncSettings::default());
    let engine = SyncEngine::spawn(
        FileStore::open(dir.path()).unwrap(),
        remote.clone(),
        Collaborators::new(),
        EngineConfig::new().with_sync_on_start(false),
        rx,
    );
    let report = engine.sync_now(false).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::NoChange);
    assert!(engine.mode().is_online());
    assert_eq!(engine.stats().corruptions, 0);
    engine.shutdown().await;

    let store = FileStore::open(dir.path()).unwrap();
    let stored = store.load().unwrap().unwrap();
    assert!(stored.snapshot.is_empty());
    assert_eq!(store.layout().blob_generations().unwrap().len(), 1);
}
