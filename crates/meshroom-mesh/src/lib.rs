//! Mesh orchestrator for Meshroom.
//!
//! The session machine decides *what* state a participant is in; this
//! crate makes the world match it. One Tokio task per client observes
//! the machine and, once per state instance:
//!
//! - **Initializing**: captures the microphone, opens the fabric
//!   endpoint, and (as a guest) opens the channel to the host, then
//!   reports `MediaAcquired` or `ConnectionFailed`.
//! - **Ready**: admits peers (host), drives the channel to the host
//!   (guest), answers calls, and routes remote audio to an
//!   [`AudioSink`].
//! - **Idle**: tears everything down.
//!
//! Results are fed back with `dispatch_for`, so work finishing after the
//! session moved on is discarded instead of corrupting the new state.

mod config;
mod effects;
mod error;
mod orchestrator;
mod playback;

pub use config::MeshConfig;
pub use error::MeshError;
pub use orchestrator::{MachineOf, MeshHandle, SnapshotOf, spawn_mesh};
pub use playback::{AudioSink, TracingSink};
