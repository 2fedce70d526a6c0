//! Codec trait and implementations for channel payloads.
//!
//! The mesh layer hands raw bytes to the fabric. A [`Codec`] turns
//! [`PeerMessage`](crate::PeerMessage)s into those bytes and back, so the
//! wire format can change without touching the orchestrator.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Encodes values to bytes and decodes bytes back.
///
/// `Send + Sync + 'static` because a codec is shared by every per-peer
/// task the orchestrator spawns.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or do
    /// not match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// JSON keeps the payloads readable in logs, and the payloads are tiny.
///
/// ## Example
///
/// ```rust
/// use meshroom_protocol::{Codec, JsonCodec, PeerMessage};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&PeerMessage::Ping).unwrap();
/// assert_eq!(bytes, br#"{"action":"ping"}"#);
///
/// let decoded: PeerMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, PeerMessage::Ping);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
