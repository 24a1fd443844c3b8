//! Server-side head and commit history.

use parking_lot::RwLock;
use std::collections::VecDeque;
use tether_protocol::{CommitRef, Snapshot};

/// The authoritative head plus a bounded list of earlier heads.
///
/// The history maintains:
/// - The current head reference and its snapshot
/// - The most recent references, newest last, head included
pub struct ServerHistory {
    inner: RwLock<Inner>,
    limit: usize,
}

struct Inner {
    head: CommitRef,
    snapshot: Snapshot,
    refs: VecDeque<CommitRef>,
}

impl ServerHistory {
    /// Creates a history whose head is an empty snapshot under a fresh
    /// reference.
    pub fn new(limit: usize) -> Self {
        Self::with_head(limit, Snapshot::empty(), CommitRef::generate())
    }

    /// Creates a history starting at the given head.
    pub fn with_head(limit: usize, snapshot: Snapshot, head: CommitRef) -> Self {
        let mut refs = VecDeque::new();
        refs.push_back(head.clone());
        Self {
            inner: RwLock::new(Inner {
                head,
                snapshot,
                refs,
            }),
            limit: limit.max(1),
        }
    }

    /// Returns the head reference.
    pub fn head(&self) -> CommitRef {
        self.inner.read().head.clone()
    }

    /// Returns the head snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().snapshot.clone()
    }

    /// Returns the head reference and snapshot read together.
    pub fn current(&self) -> (CommitRef, Snapshot) {
        let inner = self.inner.read();
        (inner.head.clone(), inner.snapshot.clone())
    }

    /// Returns true if `commit_ref` is the head or a remembered earlier head.
    pub fn contains(&self, commit_ref: &CommitRef) -> bool {
        self.inner.read().refs.contains(commit_ref)
    }

    /// Returns the number of remembered references.
    pub fn len(&self) -> usize {
        self.inner.read().refs.len()
    }

    /// Returns true if no references are remembered. Never true in practice:
    /// the head is always remembered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().refs.is_empty()
    }

    /// Makes `snapshot` the new head under a fresh reference.
    pub fn commit(&self, snapshot: Snapshot) -> CommitRef {
        let mut inner = self.inner.write();
        Self::advance(&mut inner, self.limit, snapshot)
    }

    /// Commits `snapshot` only if the head is still `expected`.
    ///
    /// Returns the new head, or the actual head if it moved.
    pub fn commit_if_head(
        &self,
        expected: &CommitRef,
        snapshot: Snapshot,
    ) -> Result<CommitRef, CommitRef> {
        let mut inner = self.inner.write();
        if &inner.head != expected {
            return Err(inner.head.clone());
        }
        Ok(Self::advance(&mut inner, self.limit, snapshot))
    }

    fn advance(inner: &mut Inner, limit: usize, snapshot: Snapshot) -> CommitRef {
        let head = CommitRef::generate();
        inner.head = head.clone();
        inner.snapshot = snapshot;
        inner.refs.push_back(head.clone());
        while inner.refs.len() > limit {
            inner.refs.pop_front();
        }
        head
    }
}

impl Default for ServerHistory {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_new_has_empty_head() {
        let history = ServerHistory::new(4);
        assert!(history.snapshot().is_empty());
        assert!(history.contains(&history.head()));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn commit_advances_head() {
        let history = ServerHistory::new(4);
        let first = history.head();

        let second = history.commit(Snapshot::from(b"v2".as_slice()));
        assert_ne!(first, second);
        assert_eq!(history.head(), second);
        assert_eq!(history.snapshot().as_bytes(), b"v2");
        assert!(history.contains(&first));
    }

    #[test]
    fn history_is_bounded() {
        let history = ServerHistory::new(2);
        let first = history.head();
        let second = history.commit(Snapshot::empty());
        let third = history.commit(Snapshot::empty());

        assert_eq!(history.len(), 2);
        assert!(!history.contains(&first));
        assert!(history.contains(&second));
        assert!(history.contains(&third));
    }

    #[test]
    fn conditional_commit() {
        let history = ServerHistory::new(4);
        let stale = history.head();
        let head = history.commit(Snapshot::from(b"remote".as_slice()));

        assert_eq!(
            history.commit_if_head(&stale, Snapshot::from(b"local".as_slice())),
            Err(head.clone())
        );
        assert_eq!(history.snapshot().as_bytes(), b"remote");

        let next = history
            .commit_if_head(&head, Snapshot::from(b"local".as_slice()))
            .unwrap();
        assert_eq!(history.head(), next);
        assert_eq!(history.snapshot().as_bytes(), b"local");
    }
}
