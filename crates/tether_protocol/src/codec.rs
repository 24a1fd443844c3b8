//! CBOR encoding helpers.
//!
//! All protocol messages and persisted records go through these two
//! functions so that encoding errors surface as [`ProtocolError`] values.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
///
/// Trailing bytes after the first complete item are rejected, so a truncated
/// or concatenated buffer never decodes as a valid message.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    let mut reader = bytes;
    let value =
        ciborium::from_reader(&mut reader).map_err(|e| ProtocolError::Decode(e.to_string()))?;
    if !reader.is_empty() {
        return Err(ProtocolError::Decode(format!(
            "{} trailing bytes after CBOR item",
            reader.len()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn encode_and_decode_struct() {
        let sample = Sample {
            name: "notes".into(),
            count: 3,
        };
        let bytes = to_cbor(&sample).unwrap();
        let decoded: Sample = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = to_cbor(&Sample {
            name: "notes".into(),
            count: 3,
        })
        .unwrap();
        let result: ProtocolResult<Sample> = from_cbor(&bytes[..bytes.len() - 2]);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn trailing_bytes_fail() {
        let mut bytes = to_cbor(&7u32).unwrap();
        bytes.push(0x00);
        let result: ProtocolResult<u32> = from_cbor(&bytes);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn garbage_fails() {
        let result: ProtocolResult<Sample> = from_cbor(&[0xff, 0x13, 0x37]);
        assert!(result.is_err());
    }
}
