//! Unified error type for Meshroom.

use meshroom_fabric::FabricError;
use meshroom_mesh::MeshError;
use meshroom_protocol::ProtocolError;
use meshroom_session::ConnectionError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `meshroom` crate you deal with this single error type
/// instead of importing errors from each sub-crate.
#[derive(Debug, thiserror::Error)]
pub enum MeshroomError {
    /// Bad user input or a malformed payload.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A fabric primitive failed.
    #[error(transparent)]
    Fabric(#[from] FabricError),

    /// A session attempt failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The orchestrator reported an error.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// The client was shut down.
    #[error("client is shut down")]
    ClientStopped,
}

#[cfg(test)]
mod tests {
    use meshroom_protocol::PeerId;
    use meshroom_session::Stage;

    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("peer id must not be empty".into());
        let meshroom_err: MeshroomError = err.into();
        assert!(matches!(meshroom_err, MeshroomError::Protocol(_)));
        assert!(meshroom_err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_from_fabric_error() {
        let err = FabricError::PeerUnavailable(PeerId::from("x"));
        let meshroom_err: MeshroomError = err.into();
        assert!(matches!(meshroom_err, MeshroomError::Fabric(_)));
    }

    #[test]
    fn test_from_connection_error() {
        let err = ConnectionError::endpoint(Stage::Live, FabricError::Destroyed);
        let meshroom_err: MeshroomError = err.into();
        assert!(matches!(meshroom_err, MeshroomError::Connection(_)));
        assert!(meshroom_err.to_string().contains("in the room"));
    }

    #[test]
    fn test_from_mesh_error() {
        let meshroom_err: MeshroomError = MeshError::Stopped.into();
        assert!(matches!(meshroom_err, MeshroomError::Mesh(_)));
    }
}
