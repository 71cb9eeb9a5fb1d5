//! The wire codec: length-delimited structured binary for streamed
//! messages, JSON for advisories, both named in §6.

use serde::{de::DeserializeOwned, Serialize};

/// Encodes `message` with the structured binary wire codec.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(message)
}

/// Decodes a payload previously produced by [`encode`].
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, bincode::Error> {
    bincode::deserialize(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawEvent;

    #[test]
    fn encode_decode_roundtrips() {
        let event = RawEvent {
            id: "e1".into(),
            source: "example.com".into(),
            title: "Title".into(),
            content: "Title".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };

        let encoded = encode(&event).unwrap();
        let decoded: RawEvent = decode(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_of_garbage_fails() {
        let result: Result<RawEvent, _> = decode(&[0xff, 0x01]);
        assert!(result.is_err());
    }
}
