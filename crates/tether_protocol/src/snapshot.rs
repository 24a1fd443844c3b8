//! Snapshot and mutation payloads.

use crate::codec::{from_cbor, to_cbor};
use crate::error::ProtocolResult;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The application-data payload kept in sync.
///
/// Snapshots are opaque to the engine. Callers that keep structured data can
/// use [`Snapshot::encode`] and [`Snapshot::decode`] to store any serde type
/// as CBOR. Cloning is cheap: the bytes are reference counted.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Bytes);

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Creates a snapshot from raw bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Encodes a structured value as a CBOR snapshot.
    pub fn encode<T: Serialize>(value: &T) -> ProtocolResult<Self> {
        Ok(Self(Bytes::from(to_cbor(value)?)))
    }

    /// Decodes the snapshot as a structured CBOR value.
    pub fn decode<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        from_cbor(&self.0)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the snapshot holds no data.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snapshot({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Snapshot {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Snapshot {
    fn from(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }
}

/// A local change that the remote has not acknowledged yet.
///
/// A mutation carries the snapshot the caller produced when applying its
/// change. Applying a further change while one is pending supersedes the
/// earlier mutation with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// Unique identifier of this mutation.
    pub id: Uuid,
    /// The proposed snapshot.
    pub snapshot: Snapshot,
}

impl Mutation {
    /// Creates a mutation proposing the given snapshot.
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn structured_snapshot() {
        let mut decks = BTreeMap::new();
        decks.insert("default".to_string(), 12u32);
        decks.insert("spanish".to_string(), 40u32);

        let snapshot = Snapshot::encode(&decks).unwrap();
        assert!(!snapshot.is_empty());

        let decoded: BTreeMap<String, u32> = snapshot.decode().unwrap();
        assert_eq!(decoded, decks);
    }

    #[test]
    fn snapshot_debug_hides_payload() {
        let snapshot = Snapshot::from(vec![1u8, 2, 3]);
        assert_eq!(format!("{snapshot:?}"), "Snapshot(3 bytes)");
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn snapshot_serializes_as_byte_string() {
        let snapshot = Snapshot::from(vec![0xAB; 4]);
        let bytes = to_cbor(&snapshot).unwrap();
        // major type 2 (byte string), length 4
        assert_eq!(bytes[0], 0x44);
        assert_eq!(&bytes[1..], &[0xAB; 4]);
    }

    #[test]
    fn mutations_get_unique_ids() {
        let a = Mutation::new(Snapshot::empty());
        let b = Mutation::new(Snapshot::empty());
        assert_ne!(a.id, b.id);
    }
}
