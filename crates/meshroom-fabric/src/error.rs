use meshroom_protocol::PeerId;

/// Errors reported by a connection fabric.
///
/// Every variant is cheap to clone so it can be carried inside session
/// state and published to observers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FabricError {
    /// The user (or the platform) refused microphone access.
    #[error("audio capture denied: {0}")]
    CaptureDenied(String),

    /// No usable audio input exists.
    #[error("audio capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Another endpoint is already registered under this id.
    #[error("id {0} is already taken")]
    IdTaken(PeerId),

    /// The remote id is not registered with the fabric.
    #[error("peer {0} is unavailable")]
    PeerUnavailable(PeerId),

    /// The signaling connection failed or was dropped.
    #[error("signaling failed: {0}")]
    Signaling(String),

    /// The data channel to this peer is closed.
    #[error("channel to {0} is closed")]
    ChannelClosed(PeerId),

    /// Media negotiation for a call failed.
    #[error("media negotiation failed: {0}")]
    Negotiation(String),

    /// The local endpoint was destroyed.
    #[error("endpoint destroyed")]
    Destroyed,
}

impl FabricError {
    /// A stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CaptureDenied(_) => "capture-denied",
            Self::CaptureUnavailable(_) => "capture-unavailable",
            Self::IdTaken(_) => "unavailable-id",
            Self::PeerUnavailable(_) => "peer-unavailable",
            Self::Signaling(_) => "network",
            Self::ChannelClosed(_) => "channel-closed",
            Self::Negotiation(_) => "negotiation-failed",
            Self::Destroyed => "destroyed",
        }
    }

    /// Whether this error came from local audio capture.
    pub fn is_capture(&self) -> bool {
        matches!(self, Self::CaptureDenied(_) | Self::CaptureUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_is_stable_per_variant() {
        assert_eq!(FabricError::Destroyed.code(), "destroyed");
        assert_eq!(
            FabricError::PeerUnavailable(PeerId::from("x")).code(),
            "peer-unavailable"
        );
        assert_eq!(FabricError::IdTaken(PeerId::from("x")).code(), "unavailable-id");
    }

    #[test]
    fn test_is_capture_only_for_capture_variants() {
        assert!(FabricError::CaptureDenied("no".into()).is_capture());
        assert!(FabricError::CaptureUnavailable("none".into()).is_capture());
        assert!(!FabricError::Signaling("down".into()).is_capture());
    }

    #[test]
    fn test_display_includes_peer() {
        let err = FabricError::ChannelClosed(PeerId::from("guest-9"));
        assert_eq!(err.to_string(), "channel to guest-9 is closed");
    }
}
