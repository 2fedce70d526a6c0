//! Core protocol types exchanged between peers.
//!
//! Everything in this module is either attached to a channel when it is
//! opened ([`ChannelMetadata`]) or sent over an open channel
//! ([`PeerMessage`]). [`PeerId`] names the participants on both ends.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The fabric-level identifier of a participant.
///
/// A host's `PeerId` doubles as the room code: guests join a room by
/// connecting to the host's id. Ids are opaque strings chosen by the
/// session layer (random UUIDs by default).
///
/// `#[serde(transparent)]` keeps the JSON form a bare string, so
/// `PeerId("abc")` serializes as `"abc"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a raw id without validation.
    ///
    /// Use [`PeerId::parse`] for ids typed in by a user.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validates user input (a room code) and wraps it.
    ///
    /// Surrounding whitespace is trimmed; an empty result is rejected.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "peer id must not be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the id and returns the underlying string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// ChannelMetadata
// ---------------------------------------------------------------------------

/// Metadata a guest attaches when it opens a channel to the host.
///
/// The host sees this on the inbound channel before any payload arrives,
/// which is how it learns the guest's display name.
///
/// On the wire: `{"displayName": "Ann", "localId": "…"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMetadata {
    /// Human-readable name chosen by the participant.
    pub display_name: String,
    /// The participant's own endpoint id.
    pub local_id: PeerId,
}

impl ChannelMetadata {
    /// Creates metadata for the participant `local_id` named `display_name`.
    pub fn new(display_name: impl Into<String>, local_id: PeerId) -> Self {
        Self {
            display_name: display_name.into(),
            local_id,
        }
    }
}

// ---------------------------------------------------------------------------
// PeerMessage
// ---------------------------------------------------------------------------

/// A payload sent over an open data channel.
///
/// Both messages are liveness signals: receivers log them and otherwise
/// ignore them. There is no chat.
///
/// `#[serde(tag = "action")]` produces internally tagged JSON:
/// `{"action":"hello","text":"hello, host"}` and `{"action":"ping"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PeerMessage {
    /// Sent by a guest once its channel to the host opens.
    Hello {
        /// Free-form greeting text.
        text: String,
    },

    /// Sent by the host to a guest right after admitting it.
    Ping,
}
