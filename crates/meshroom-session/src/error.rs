//! Error types for the session layer.

use std::fmt;

use meshroom_fabric::FabricError;

/// Where in the session lifecycle an endpoint failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Registering the local endpoint with the fabric.
    Opening,
    /// Opening the guest's channel to the host.
    Connecting,
    /// After the session reached `Ready`.
    Live,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opening => f.write_str("opening the endpoint"),
            Self::Connecting => f.write_str("connecting to the host"),
            Self::Live => f.write_str("in the room"),
        }
    }
}

/// A failure that ends the current session attempt.
///
/// Carried by the `ConnectionFailed` intent and kept as the machine's
/// last error so the presentation layer can explain why it is back at
/// the room-entry form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The microphone could not be acquired.
    #[error("audio capture failed: {0}")]
    Capture(#[source] FabricError),

    /// The fabric endpoint failed.
    #[error("endpoint failed while {stage}: {source}")]
    Endpoint {
        /// Lifecycle stage the failure occurred in.
        stage: Stage,
        /// The underlying fabric error.
        #[source]
        source: FabricError,
    },
}

impl ConnectionError {
    /// Shorthand for [`ConnectionError::Endpoint`].
    pub fn endpoint(stage: Stage, source: FabricError) -> Self {
        Self::Endpoint { stage, source }
    }

    /// The stage of an endpoint failure; `None` for capture failures.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Capture(_) => None,
            Self::Endpoint { stage, .. } => Some(*stage),
        }
    }

    /// The fabric error underneath.
    pub fn fabric_error(&self) -> &FabricError {
        match self {
            Self::Capture(source) | Self::Endpoint { source, .. } => source,
        }
    }

    /// Stable code of the underlying fabric error.
    pub fn code(&self) -> &'static str {
        self.fabric_error().code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshroom_protocol::PeerId;

    #[test]
    fn test_endpoint_error_display_names_stage() {
        let err = ConnectionError::endpoint(
            Stage::Connecting,
            FabricError::PeerUnavailable(PeerId::from("abc123")),
        );
        assert_eq!(
            err.to_string(),
            "endpoint failed while connecting to the host: peer abc123 is unavailable"
        );
        assert_eq!(err.stage(), Some(Stage::Connecting));
        assert_eq!(err.code(), "peer-unavailable");
    }

    #[test]
    fn test_capture_error_has_no_stage() {
        let err = ConnectionError::Capture(FabricError::CaptureDenied("no".into()));
        assert_eq!(err.stage(), None);
        assert!(err.fabric_error().is_capture());
    }
}
