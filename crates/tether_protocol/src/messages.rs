//! Protocol messages for sync.
//!
//! A client reconciles by sending its base commit reference and, if it has
//! one, the pending mutation. The remote answers with its current head and,
//! whenever the client has to adopt or inspect remote data, the remote
//! snapshot. A force-push is a separate overwrite exchange.

use crate::codec::{from_cbor, to_cbor};
use crate::commit::CommitRef;
use crate::error::{ProtocolError, ProtocolResult};
use crate::snapshot::{Mutation, Snapshot};
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u16 = 1;

/// HTTP path of the reconcile endpoint.
pub const RECONCILE_PATH: &str = "/sync/reconcile";

/// HTTP path of the overwrite endpoint.
pub const OVERWRITE_PATH: &str = "/sync/overwrite";

/// Reconcile request from client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    /// Protocol version spoken by the client.
    pub protocol_version: u16,
    /// Commit reference the client's stored snapshot is based on.
    pub base_ref: CommitRef,
    /// Local change to push, if any.
    pub pending: Option<Mutation>,
}

impl ReconcileRequest {
    /// Creates a new reconcile request.
    pub fn new(base_ref: CommitRef, pending: Option<Mutation>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            base_ref,
            pending,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR and checks the protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let request: Self = from_cbor(bytes)?;
        check_version(request.protocol_version)?;
        Ok(request)
    }
}

/// Reconcile response from the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconcileResponse {
    /// The client is already at the remote head and pushed nothing.
    UpToDate {
        /// Current remote head.
        head: CommitRef,
    },
    /// The pending mutation was committed on top of the client's base.
    Accepted {
        /// New remote head.
        head: CommitRef,
        /// Snapshot committed at `head`.
        snapshot: Snapshot,
    },
    /// The remote moved ahead of a client that had nothing to push.
    FastForward {
        /// Current remote head.
        head: CommitRef,
        /// Snapshot at `head`.
        snapshot: Snapshot,
    },
    /// The remote moved away from the client's base.
    Diverged {
        /// Current remote head.
        head: CommitRef,
        /// Snapshot at `head`.
        snapshot: Snapshot,
    },
    /// The remote refused the request.
    Rejected {
        /// Human-readable reason.
        message: String,
    },
}

impl ReconcileResponse {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

/// Force-push request: replace the remote head with the client's snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteRequest {
    /// Protocol version spoken by the client.
    pub protocol_version: u16,
    /// Remote head the client saw when it decided to overwrite.
    pub expected_head: CommitRef,
    /// Snapshot to install.
    pub snapshot: Snapshot,
}

impl OverwriteRequest {
    /// Creates a new overwrite request.
    pub fn new(expected_head: CommitRef, snapshot: Snapshot) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            expected_head,
            snapshot,
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR and checks the protocol version.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let request: Self = from_cbor(bytes)?;
        check_version(request.protocol_version)?;
        Ok(request)
    }
}

/// Overwrite response from the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverwriteResponse {
    /// The snapshot was installed as the new head.
    Committed {
        /// Head assigned to the installed snapshot.
        head: CommitRef,
    },
    /// The remote refused the overwrite.
    Rejected {
        /// Human-readable reason.
        message: String,
    },
}

impl OverwriteResponse {
    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }
}

fn check_version(remote: u16) -> ProtocolResult<()> {
    if remote != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            local: PROTOCOL_VERSION,
            remote,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(token: &str) -> CommitRef {
        CommitRef::parse(token).unwrap()
    }

    #[test]
    fn reconcile_request_with_pending() {
        let pending = Mutation::new(Snapshot::from(vec![1u8, 2, 3]));
        let request = ReconcileRequest::new(commit("a1"), Some(pending.clone()));

        let decoded = ReconcileRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.base_ref, commit("a1"));
        assert_eq!(decoded.pending, Some(pending));
    }

    #[test]
    fn reconcile_request_version_mismatch() {
        let mut request = ReconcileRequest::new(commit("a1"), None);
        request.protocol_version = 9;
        let bytes = request.encode().unwrap();

        assert!(matches!(
            ReconcileRequest::decode(&bytes),
            Err(ProtocolError::VersionMismatch {
                local: 1,
                remote: 9
            })
        ));
    }

    #[test]
    fn response_variants_decode() {
        let responses = [
            ReconcileResponse::UpToDate { head: commit("h") },
            ReconcileResponse::Diverged {
                head: commit("b"),
                snapshot: Snapshot::from(vec![9u8]),
            },
            ReconcileResponse::Rejected {
                message: "snapshot too large".into(),
            },
        ];

        for response in responses {
            let decoded = ReconcileResponse::decode(&response.encode().unwrap()).unwrap();
            assert_eq!(decoded, response);
        }
    }

    #[test]
    fn response_missing_head_is_invalid() {
        // A map with only a status tag cannot satisfy any variant with a head.
        let bytes = to_cbor(&[("status", "accepted")]
            .into_iter()
            .collect::<std::collections::BTreeMap<_, _>>())
        .unwrap();
        assert!(ReconcileResponse::decode(&bytes).is_err());
    }

    #[test]
    fn overwrite_exchange() {
        let request = OverwriteRequest::new(commit("b"), Snapshot::from(vec![4u8]));
        let decoded = OverwriteRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded.expected_head, commit("b"));

        let response = OverwriteResponse::Committed { head: commit("c") };
        let decoded = OverwriteResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
    }
}
