//! Payload codec boundary.
//!
//! Typed payloads cross the interchange as opaque byte buffers. The wire
//! form is JSON; endpoints never exchange bytes with anything outside the
//! process, so compactness matters less than debuggability.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::TransportError;

/// Bound on payload types carried over the interchange.
///
/// Blanket-implemented; any owned serde type qualifies.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Message for T {}

/// Encodes a payload bound for `topic`.
///
/// # Errors
///
/// Returns [`TransportError::Encode`] if serialization fails.
pub fn encode<T: Message>(topic: &str, value: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(value).map_err(|source| TransportError::Encode {
        topic: topic.to_owned(),
        source,
    })
}

/// Decodes a payload that arrived on `topic`.
///
/// # Errors
///
/// Returns [`TransportError::Decode`] if deserialization fails.
pub fn decode<T: Message>(topic: &str, bytes: &[u8]) -> Result<T, TransportError> {
    serde_json::from_slice(bytes).map_err(|source| TransportError::Decode {
        topic: topic.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        id: u32,
        value: f64,
    }

    #[test]
    fn test_encode_decode() {
        let reading = Reading { id: 3, value: 2.5 };
        let bytes = encode("sensor", &reading).unwrap();
        let back: Reading = decode("sensor", &bytes).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode::<Reading>("sensor", b"not json").unwrap_err();
        assert!(matches!(err, TransportError::Decode { .. }));
    }
}
