//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use tether_protocol::{CommitRef, Mutation, Snapshot};
use tether_store::StoredState;
use uuid::Uuid;

/// Strategy for generating valid commit references.
pub fn commit_ref_strategy() -> impl Strategy<Value = CommitRef> {
    prop::string::string_regex("[a-z0-9][a-z0-9-]{0,63}")
        .expect("Invalid regex")
        .prop_map(|token| CommitRef::parse(token).expect("Generated token must be valid"))
}

/// Strategy for generating snapshots (arbitrary bytes).
pub fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    prop::collection::vec(any::<u8>(), 0..1024).prop_map(Snapshot::from)
}

/// Strategy for generating pending mutations with deterministic ids.
pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    (any::<u128>(), snapshot_strategy()).prop_map(|(id, snapshot)| Mutation {
        id: Uuid::from_u128(id),
        snapshot,
    })
}

/// Strategy for generating stored states, with or without a pending change.
pub fn stored_state_strategy() -> impl Strategy<Value = StoredState> {
    (
        snapshot_strategy(),
        commit_ref_strategy(),
        prop::option::of(mutation_strategy()),
    )
        .prop_map(|(snapshot, commit_ref, pending)| StoredState {
            snapshot,
            commit_ref,
            pending,
        })
}

/// Strategy for generating a sequence of states to save one after another.
pub fn state_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoredState>> {
    prop::collection::vec(stored_state_strategy(), 1..=max_len.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_commit_refs_are_valid() {
        let mut runner = TestRunner::default();
        runner
            .run(&commit_ref_strategy(), |commit_ref| {
                prop_assert!(!commit_ref.as_str().is_empty());
                prop_assert!(commit_ref.as_str().len() <= 64);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_snapshots_bounded() {
        let mut runner = TestRunner::default();
        runner
            .run(&snapshot_strategy(), |snapshot| {
                prop_assert!(snapshot.len() < 1024);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_sequences_never_empty() {
        let mut runner = TestRunner::default();
        runner
            .run(&state_sequence_strategy(0), |states| {
                prop_assert_eq!(states.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}
