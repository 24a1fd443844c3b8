//! Commit references.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a commit reference, in bytes.
const MAX_LEN: usize = 128;

/// An opaque token identifying a point in the synchronized history.
///
/// Commit references are compared for equality only. The remote authority
/// alone defines ancestry between references, so no ordering is exposed.
///
/// A `CommitRef` is never empty: a local store that has not synchronized yet
/// holds a freshly [generated](CommitRef::generate) reference instead.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CommitRef(String);

impl CommitRef {
    /// Generates a fresh, random commit reference.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Creates a commit reference from a token issued by a remote.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is empty, too long, or contains
    /// whitespace or control characters.
    pub fn parse(token: impl Into<String>) -> ProtocolResult<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(ProtocolError::InvalidCommitRef(
                "commit reference is empty".into(),
            ));
        }
        if token.len() > MAX_LEN {
            return Err(ProtocolError::InvalidCommitRef(format!(
                "commit reference is {} bytes, limit is {MAX_LEN}",
                token.len()
            )));
        }
        if token
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ProtocolError::InvalidCommitRef(format!(
                "commit reference {token:?} contains whitespace or control characters"
            )));
        }
        Ok(Self(token))
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitRef({})", self.0)
    }
}

impl FromStr for CommitRef {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CommitRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CommitRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::parse(token).map_err(serde::de::Error::custom)
    }
}
