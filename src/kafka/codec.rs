//! Message codec
//!
//! Values are encoded as JSON before they reach the broker. Consumers get the
//! raw bytes back; `decode_value` is a convenience for handlers that share the
//! producer's schema.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::Result;

/// Encode an application value into a message payload
///
/// # Errors
///
/// Returns `KafkaError::Encode` if the value cannot be serialized
/// (for example a map with non-string keys).
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let encoded = serde_json::to_vec(value)?;
    Ok(Bytes::from(encoded))
}

/// Decode a payload produced by `encode_value`
pub fn decode_value<T: DeserializeOwned>(payload: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice(payload)
}
