//! A scripted remote for testing.

use crate::error::{SyncError, SyncResult};
use crate::remote::{Divergence, RemoteSynchronizer, SyncOutcome};
use crate::settings::ProxyConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tether_protocol::{CommitRef, Mutation, Snapshot};
use tokio::sync::{watch, Notify};

/// A scripted reply to a reconcile call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer [`SyncOutcome::NoChange`].
    NoChange,
    /// Answer [`SyncOutcome::FastForwarded`].
    FastForward {
        /// Snapshot to hand out.
        snapshot: Snapshot,
        /// Reference to hand out.
        commit_ref: CommitRef,
    },
    /// Answer [`SyncOutcome::Diverged`] against this remote head.
    Diverge {
        /// Remote snapshot.
        snapshot: Snapshot,
        /// Remote reference.
        commit_ref: CommitRef,
    },
    /// Fail with a retryable transport error.
    Fail(String),
    /// Answer with something that cannot be decoded.
    Malformed,
    /// Never answer.
    Hang,
}

/// A recorded reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileCall {
    /// The local reference sent.
    pub local_ref: CommitRef,
    /// The pending mutation sent.
    pub pending: Option<Mutation>,
}

/// A recorded overwrite call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverwriteCall {
    /// The snapshot pushed.
    pub snapshot: Snapshot,
    /// The remote reference the caller expected.
    pub expected_remote: CommitRef,
}

#[derive(Debug)]
struct Script {
    replies: VecDeque<MockReply>,
    fallback: MockReply,
    overwrites: VecDeque<Result<CommitRef, String>>,
    reconcile_calls: Vec<ReconcileCall>,
    overwrite_calls: Vec<OverwriteCall>,
    proxies: Vec<Option<ProxyConfig>>,
    delay: Option<Duration>,
}

/// A mock remote for testing.
///
/// Reconcile calls consume scripted replies in order and fall back to a
/// fixed reply once the script is empty. Every call is recorded, and the
/// number of calls in flight at once is tracked.
#[derive(Debug)]
pub struct MockRemote {
    script: Mutex<Script>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: watch::Sender<bool>,
    entered: Notify,
}

impl MockRemote {
    /// Creates a mock that answers `NoChange` until scripted otherwise.
    pub fn new() -> Self {
        Self::with_fallback(MockReply::NoChange)
    }

    /// Creates a mock with the given fallback reply.
    pub fn with_fallback(fallback: MockReply) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            script: Mutex::new(Script {
                replies: VecDeque::new(),
                fallback,
                overwrites: VecDeque::new(),
                reconcile_calls: Vec::new(),
                overwrite_calls: Vec::new(),
                proxies: Vec::new(),
                delay: None,
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate,
            entered: Notify::new(),
        }
    }

    /// Queues a reconcile reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.script.lock().replies.push_back(reply);
    }

    /// Sets the reply used once the script is empty.
    pub fn set_fallback(&self, reply: MockReply) {
        self.script.lock().fallback = reply;
    }

    /// Queues an overwrite result. Without one, overwrites succeed with a
    /// freshly generated reference.
    pub fn push_overwrite(&self, result: Result<CommitRef, String>) {
        self.script.lock().overwrites.push_back(result);
    }

    /// Delays every reconcile by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    /// Holds reconcile calls until [`MockRemote::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    /// Releases held reconcile calls.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Waits until a reconcile call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Returns the recorded reconcile calls.
    pub fn reconcile_calls(&self) -> Vec<ReconcileCall> {
        self.script.lock().reconcile_calls.clone()
    }

    /// Returns the recorded overwrite calls.
    pub fn overwrite_calls(&self) -> Vec<OverwriteCall> {
        self.script.lock().overwrite_calls.clone()
    }

    /// Returns every proxy configuration received.
    pub fn proxies(&self) -> Vec<Option<ProxyConfig>> {
        self.script.lock().proxies.clone()
    }

    /// Returns the highest number of concurrent reconcile calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteSynchronizer for MockRemote {
    async fn reconcile(&self, local_ref: &CommitRef, pending: Option<&Mutation>) -> SyncOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (reply, delay) = {
            let mut script = self.script.lock();
            script.reconcile_calls.push(ReconcileCall {
                local_ref: local_ref.clone(),
                pending: pending.cloned(),
            });
            let reply = script
                .replies
                .pop_front()
                .unwrap_or_else(|| script.fallback.clone());
            (reply, script.delay)
        };
        self.entered.notify_one();

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            MockReply::NoChange => SyncOutcome::NoChange,
            MockReply::FastForward {
                snapshot,
                commit_ref,
            } => SyncOutcome::FastForwarded {
                snapshot,
                commit_ref,
            },
            MockReply::Diverge {
                snapshot,
                commit_ref,
            } => SyncOutcome::Diverged(Divergence {
                local_snapshot: pending.map(|m| m.snapshot.clone()).unwrap_or_default(),
                remote_snapshot: snapshot,
                local_ref: local_ref.clone(),
                remote_ref: commit_ref,
            }),
            MockReply::Fail(message) => {
                SyncOutcome::Unreachable(SyncError::transport_retryable(message))
            }
            MockReply::Malformed => {
                SyncOutcome::Unreachable(SyncError::Protocol("malformed response".into()))
            }
            MockReply::Hang => std::future::pending().await,
        }
    }

    async fn overwrite(
        &self,
        snapshot: &Snapshot,
        expected_remote: &CommitRef,
    ) -> SyncResult<CommitRef> {
        let mut script = self.script.lock();
        script.overwrite_calls.push(OverwriteCall {
            snapshot: snapshot.clone(),
            expected_remote: expected_remote.clone(),
        });
        match script.overwrites.pop_front() {
            Some(Ok(head)) => Ok(head),
            Some(Err(message)) => Err(SyncError::ServerError(message)),
            None => Ok(CommitRef::generate()),
        }
    }

    fn configure_proxy(&self, proxy: Option<&ProxyConfig>) {
        self.script.lock().proxies.push(proxy.cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(token: &str) -> CommitRef {
        CommitRef::parse(token).unwrap()
    }

    #[tokio::test]
    async fn script_then_fallback() {
        let remote = MockRemote::new();
        remote.push_reply(MockReply::Fail("down".into()));

        let first = remote.reconcile(&commit("a"), None).await;
        assert!(matches!(first, SyncOutcome::Unreachable(_)));
        let second = remote.reconcile(&commit("a"), None).await;
        assert!(matches!(second, SyncOutcome::NoChange));

        assert_eq!(remote.reconcile_calls().len(), 2);
        assert_eq!(remote.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn overwrite_defaults_to_fresh_ref() {
        let remote = MockRemote::new();
        remote.push_overwrite(Ok(commit("c")));

        let snapshot = Snapshot::from(b"A".as_slice());
        assert_eq!(remote.overwrite(&snapshot, &commit("b")).await.unwrap(), commit("c"));
        let generated = remote.overwrite(&snapshot, &commit("c")).await.unwrap();
        assert_ne!(generated, commit("c"));

        let calls = remote.overwrite_calls();
        assert_eq!(calls[0].snapshot, snapshot);
        assert_eq!(calls[0].expected_remote, commit("b"));
    }

    #[tokio::test]
    async fn held_calls_wait_for_release() {
        let remote = std::sync::Arc::new(MockRemote::new());
        remote.hold();

        let task = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.reconcile(&commit("a"), None).await })
        };
        remote.entered().await;
        assert!(!task.is_finished());

        remote.release();
        assert!(matches!(task.await.unwrap(), SyncOutcome::NoChange));
    }
}
