//! Error types for the protocol layer.
//!
//! These errors never end a session. A payload that fails to decode is
//! logged by the mesh and dropped; the channel it came from stays open.
//! The `Encode`/`Decode` variants exist only with the `json` feature,
//! because they wrap `serde_json::Error` directly.

/// Errors that can occur while encoding or decoding peer payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed.
    ///
    /// Common causes: a peer running different software, a truncated
    /// payload, or plain text where JSON was expected.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The payload decoded but is not meaningful, e.g. an empty peer id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
