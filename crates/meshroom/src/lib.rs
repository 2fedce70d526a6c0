//! # Meshroom
//!
//! Ad-hoc audio rooms over a peer-to-peer connection fabric.
//!
//! One participant creates a room and becomes its host; the host's id is
//! the room code. Others join with that code, the host calls each of
//! them, and everyone keeps a live roster of connected peers.
//!
//! Meshroom owns the session lifecycle (state machine, roster, error
//! recovery). The fabric that moves bytes and audio is pluggable through
//! the [`Fabric`] trait; an in-process [`LoopbackFabric`] ships for tests
//! and demos.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshroom::prelude::*;
//!
//! # async fn demo() -> Result<(), MeshroomError> {
//! let fabric = LoopbackFabric::new();
//! let host = MeshroomClientBuilder::new().build(fabric.clone(), TracingSink);
//! host.create_room("alice")?;
//! let ready = host
//!     .wait_until(|s| s.session.kind() == SessionKind::Ready)
//!     .await?;
//! let room_code = host.local_id().expect("ready sessions have an id");
//!
//! let guest = MeshroomClientBuilder::new().build(fabric, TracingSink);
//! guest.join_room("bob", room_code.as_str())?;
//! # let _ = ready;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod logging;

pub use client::{MeshroomClient, MeshroomClientBuilder};
pub use error::MeshroomError;
pub use logging::{DEFAULT_LOG_FILTER, env_filter, init_tracing};

pub use meshroom_fabric::{
    Call, CaptureMode, Channel, ChannelEvent, Endpoint, EndpointEvent, Fabric, FabricError,
    LoopbackFabric, LoopbackOptions, LoopbackStream, MediaStream,
};
pub use meshroom_mesh::{AudioSink, MeshConfig, MeshError, SnapshotOf, TracingSink};
pub use meshroom_protocol::{ChannelMetadata, PeerId, PeerMessage, ProtocolError};
pub use meshroom_session::{
    ConnectionError, Epoch, IdentityGenerator, Membership, RandomIdentity, ReadySession, Role,
    RoomCommand, Roster, Session, SessionKind, Stage,
};

pub mod prelude {
    pub use crate::{
        AudioSink, ConnectionError, Fabric, LoopbackFabric, MediaStream, MeshConfig,
        MeshroomClient, MeshroomClientBuilder, MeshroomError, PeerId, Role, RoomCommand, Session,
        SessionKind, TracingSink, init_tracing,
    };
}
