//! On-disk record formats.
//!
//! ```text
//! state-<generation>.bin
//! ┌────────────┬──────────────┬───────────────────────────────┐
//! │ magic (4)  │ version (2)  │ CBOR { snapshot, pending }    │
//! └────────────┴──────────────┴───────────────────────────────┘
//!
//! HEAD
//! CBOR { format_version, generation, commit_ref, blob_len, blob_sha256 }
//! ```
//!
//! The HEAD record names the blob that belongs to its commit reference and
//! pins the blob's length and SHA-256, so a blob can never be paired with the
//! wrong reference.

use crate::error::{StoreError, StoreResult};
use crate::state::StoredState;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tether_protocol::{from_cbor, to_cbor, CommitRef, Mutation, Snapshot};

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Magic bytes at the start of every state blob.
const BLOB_MAGIC: [u8; 4] = *b"TTHR";

/// Size of the blob header (magic + version).
const BLOB_HEADER_LEN: usize = 6;

/// The commit point of a file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Head {
    /// Format version of the store.
    pub format_version: u16,
    /// Generation number of the current blob.
    pub generation: u64,
    /// Commit reference of the stored snapshot.
    pub commit_ref: CommitRef,
    /// Length of the blob in bytes.
    pub blob_len: u64,
    /// Hex-encoded SHA-256 of the blob.
    pub blob_sha256: String,
}

impl Head {
    /// Encodes to CBOR.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        to_cbor(self).map_err(|e| StoreError::Codec(e.to_string()))
    }

    /// Decodes from CBOR, treating any failure as corruption.
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let head: Self = from_cbor(bytes)
            .map_err(|e| StoreError::corrupted(format!("unreadable HEAD: {e}")))?;
        if head.format_version != FORMAT_VERSION {
            return Err(StoreError::corrupted(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                head.format_version
            )));
        }
        Ok(head)
    }

    /// Checks that `blob` is the blob this head points at.
    pub fn verify_blob(&self, blob: &[u8]) -> StoreResult<()> {
        if blob.len() as u64 != self.blob_len {
            return Err(StoreError::corrupted(format!(
                "blob length {} does not match HEAD ({})",
                blob.len(),
                self.blob_len
            )));
        }
        let digest = checksum(blob);
        if digest != self.blob_sha256 {
            return Err(StoreError::corrupted(format!(
                "blob checksum {digest} does not match HEAD ({})",
                self.blob_sha256
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct BlobBody {
    snapshot: Snapshot,
    pending: Option<Mutation>,
}

/// Encodes the snapshot and pending mutation of a state into a blob.
pub(crate) fn encode_blob(state: &StoredState) -> StoreResult<Vec<u8>> {
    let body = BlobBody {
        snapshot: state.snapshot.clone(),
        pending: state.pending.clone(),
    };
    let encoded = to_cbor(&body).map_err(|e| StoreError::Codec(e.to_string()))?;

    let mut blob = Vec::with_capacity(BLOB_HEADER_LEN + encoded.len());
    blob.extend_from_slice(&BLOB_MAGIC);
    blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    blob.extend_from_slice(&encoded);
    Ok(blob)
}

/// Decodes a verified blob back into a state under the head's reference.
pub(crate) fn decode_blob(head: &Head, blob: &[u8]) -> StoreResult<StoredState> {
    if blob.len() < BLOB_HEADER_LEN || blob[..4] != BLOB_MAGIC {
        return Err(StoreError::corrupted("blob has no valid header"));
    }
    let version = u16::from_le_bytes([blob[4], blob[5]]);
    if version != FORMAT_VERSION {
        return Err(StoreError::corrupted(format!(
            "blob format version {version} (expected {FORMAT_VERSION})"
        )));
    }
    let body: BlobBody = from_cbor(&blob[BLOB_HEADER_LEN..])
        .map_err(|e| StoreError::corrupted(format!("unreadable blob body: {e}")))?;

    Ok(StoredState {
        snapshot: body.snapshot,
        commit_ref: head.commit_ref.clone(),
        pending: body.pending,
    })
}

/// Returns the hex-encoded SHA-256 of `data`.
pub(crate) fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
