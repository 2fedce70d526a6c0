//! Error types for the mesh layer.

use meshroom_fabric::FabricError;
use meshroom_protocol::{PeerId, ProtocolError};

/// Errors raised while running a room.
///
/// Per-peer failures never end the session; they are logged and, for
/// channel failures, turned into a roster removal.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// A peer's data channel failed.
    #[error("channel with {peer_id} failed: {source}")]
    Channel {
        peer_id: PeerId,
        #[source]
        source: FabricError,
    },

    /// Placing, answering, or receiving a call failed.
    #[error("call with {peer_id} failed: {source}")]
    Call {
        peer_id: PeerId,
        #[source]
        source: FabricError,
    },

    /// A payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(#[from] ProtocolError),

    /// The orchestrator task has exited.
    #[error("mesh orchestrator is not running")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display_names_peer() {
        let err = MeshError::Channel {
            peer_id: PeerId::from("g1"),
            source: FabricError::ChannelClosed(PeerId::from("g1")),
        };
        assert!(err.to_string().starts_with("channel with g1 failed"));
    }

    #[test]
    fn test_protocol_error_converts() {
        let err: MeshError = ProtocolError::InvalidMessage("bad".into()).into();
        assert!(matches!(err, MeshError::Payload(_)));
    }
}
