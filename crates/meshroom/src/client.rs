//! `MeshroomClient` builder and presentation-facing API.
//!
//! This is the entry point for an application: it ties the session
//! machine to a fabric through the mesh orchestrator and exposes the
//! three user actions plus state observation.

use meshroom_fabric::Fabric;
use meshroom_mesh::{AudioSink, MachineOf, MeshConfig, MeshHandle, SnapshotOf, spawn_mesh};
use meshroom_protocol::PeerId;
use meshroom_session::{
    ConnectionError, IdentityGenerator, RandomIdentity, RoomCommand, SessionMachine,
};
use tokio::sync::watch;

use crate::MeshroomError;

/// Builder for configuring and starting a Meshroom client.
///
/// # Example
///
/// ```rust,ignore
/// use meshroom::prelude::*;
///
/// let client = MeshroomClientBuilder::new()
///     .config(MeshConfig { greeting: "hi".into(), ..MeshConfig::default() })
///     .build(LoopbackFabric::new(), TracingSink);
/// ```
pub struct MeshroomClientBuilder<I = RandomIdentity> {
    config: MeshConfig,
    identity: I,
}

impl MeshroomClientBuilder {
    /// Creates a new builder with default settings and random ids.
    pub fn new() -> Self {
        Self {
            config: MeshConfig::default(),
            identity: RandomIdentity,
        }
    }
}

impl<I: IdentityGenerator> MeshroomClientBuilder<I> {
    /// Sets the orchestrator configuration.
    pub fn config(mut self, config: MeshConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the generator of local endpoint ids.
    pub fn identity<J: IdentityGenerator>(self, identity: J) -> MeshroomClientBuilder<J> {
        MeshroomClientBuilder {
            config: self.config,
            identity,
        }
    }

    /// Builds the client and starts its orchestrator.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build<F, A>(self, fabric: F, sink: A) -> MeshroomClient<F>
    where
        F: Fabric,
        A: AudioSink<F::Stream>,
    {
        let machine: MachineOf<F> = SessionMachine::new(self.identity);
        let mesh = spawn_mesh(fabric, machine.clone(), sink, self.config);
        tracing::debug!("meshroom client started");
        MeshroomClient { machine, mesh }
    }
}

impl Default for MeshroomClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A participant in (at most) one audio room at a time.
///
/// The action methods return whether the request was accepted: asking
/// to create a room while already in one, for instance, is ignored and
/// returns `Ok(false)`.
///
/// Only [`RoomCommand`]s go in. The fabric-driven intents (media
/// acquired, peer joined, connection failed) belong to the orchestrator,
/// so the machine itself is not reachable from here:
///
/// ```rust,compile_fail
/// use meshroom::prelude::*;
///
/// fn forge(client: &MeshroomClient<LoopbackFabric>) {
///     let _ = client.machine();
/// }
/// ```
pub struct MeshroomClient<F: Fabric> {
    machine: MachineOf<F>,
    mesh: MeshHandle,
}

impl<F: Fabric> MeshroomClient<F> {
    /// Hosts a new room. The room code is our local id once ready.
    pub fn create_room(&self, display_name: impl Into<String>) -> Result<bool, MeshroomError> {
        self.command(RoomCommand::CreateRoom {
            display_name: display_name.into(),
        })
    }

    /// Joins the room whose code is `room_code`.
    ///
    /// # Errors
    /// Returns [`MeshroomError::Protocol`] if the code is blank.
    pub fn join_room(
        &self,
        display_name: impl Into<String>,
        room_code: &str,
    ) -> Result<bool, MeshroomError> {
        let remote_id = PeerId::parse(room_code)?;
        self.command(RoomCommand::JoinRoom {
            display_name: display_name.into(),
            remote_id,
        })
    }

    /// Leaves the current room.
    pub fn leave_room(&self) -> Result<bool, MeshroomError> {
        self.command(RoomCommand::LeaveRoom)
    }

    /// Dispatches a user command.
    pub fn command(&self, command: RoomCommand) -> Result<bool, MeshroomError> {
        if !self.mesh.is_running() {
            return Err(MeshroomError::ClientStopped);
        }
        Ok(self.machine.dispatch(command).is_applied())
    }

    /// The current snapshot.
    pub fn state(&self) -> SnapshotOf<F> {
        self.machine.current_state()
    }

    /// Observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SnapshotOf<F>> {
        self.machine.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns it.
    ///
    /// Checks the current state first.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&SnapshotOf<F>) -> bool,
    ) -> Result<SnapshotOf<F>, MeshroomError> {
        let mut state = self.machine.subscribe();
        let snapshot = state
            .wait_for(predicate)
            .await
            .map_err(|_| MeshroomError::ClientStopped)?;
        Ok(snapshot.clone())
    }

    /// Our endpoint id, unless idle. For a host this is the room code.
    pub fn local_id(&self) -> Option<PeerId> {
        self.state()
            .session
            .membership()
            .map(|membership| membership.local_id().clone())
    }

    /// Ids of the connected peers, sorted. Empty unless in a room.
    pub fn peers(&self) -> Vec<PeerId> {
        self.state()
            .session
            .roster()
            .map(|roster| roster.peer_ids())
            .unwrap_or_default()
    }

    /// Why the last attempt failed, until the next one starts.
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.state().last_error
    }

    /// Leaves the room if needed, releases all fabric resources, and
    /// stops the orchestrator.
    pub async fn shutdown(self) -> Result<(), MeshroomError> {
        self.machine.dispatch(RoomCommand::LeaveRoom);
        self.mesh.shutdown().await?;
        tracing::debug!("meshroom client stopped");
        Ok(())
    }
}
