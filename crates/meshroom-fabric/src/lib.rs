//! Connection fabric contract for Meshroom.
//!
//! The fabric is whatever real-time library performs signaling, NAT
//! traversal, and raw media/data transport. Meshroom does not implement
//! one; it consumes the [`Fabric`], [`Endpoint`], [`Channel`], [`Call`],
//! and [`MediaStream`] traits defined here.
//!
//! All event sources are pull-based: instead of registering callbacks,
//! callers `await` the next [`EndpointEvent`] or [`ChannelEvent`].
//!
//! ## Pull-based events
//!
//! Browser-style libraries push events into callbacks (`on("open", ..)`).
//! In async Rust a callback would need to own a clone of everything it
//! touches and could fire on any thread at any time. Pulling is simpler:
//! the task that cares about a channel sits in a loop,
//!
//! ```rust,ignore
//! while let Some(event) = channel.next_event().await {
//!     match event { /* Open, Data, Close, Error */ }
//! }
//! ```
//!
//! and the loop *is* the listener. Dropping or aborting the task
//! unsubscribes it. `None` means the source is finished for good.
//!
//! The trait methods return `impl Future + Send` so the futures can be
//! handed to `tokio::spawn`, which may move them between worker threads.
//!
//! # Feature Flags
//!
//! - `loopback` (default): an in-process fabric over Tokio channels,
//!   used by tests and demos ([`LoopbackFabric`])

mod error;
#[cfg(feature = "loopback")]
mod loopback;

pub use error::FabricError;
#[cfg(feature = "loopback")]
pub use loopback::{
    CaptureMode, LoopbackCall, LoopbackChannel, LoopbackEndpoint, LoopbackFabric,
    LoopbackOptions, LoopbackStream,
};

use std::fmt;
use std::future::Future;

use meshroom_protocol::{ChannelMetadata, PeerId};

/// A handle to a live audio stream (local capture or a remote peer's audio).
///
/// Handles are cheap to clone; clones refer to the same stream.
pub trait MediaStream: Clone + fmt::Debug + Send + Sync + 'static {
    /// Identifier of the underlying stream.
    fn id(&self) -> &str;

    /// Stops the stream's tracks. Idempotent.
    fn stop(&self);

    /// Whether the stream is still producing media.
    fn is_active(&self) -> bool;
}

/// Something that happened on a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel finished negotiating and can carry data.
    Open,
    /// A payload arrived from the remote peer.
    Data(Vec<u8>),
    /// The channel closed. No further events follow.
    Close,
    /// The channel failed. Treat as terminal.
    Error(FabricError),
}

/// A bidirectional data channel to one remote peer.
pub trait Channel: Clone + fmt::Debug + Send + Sync + 'static {
    /// The peer on the other end.
    fn remote_id(&self) -> &PeerId;

    /// Metadata attached by whoever opened the channel.
    fn metadata(&self) -> &ChannelMetadata;

    /// Sends a payload to the remote peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<(), FabricError>> + Send;

    /// Waits for the next event on this channel.
    ///
    /// Returns `None` once the fabric will never produce another event.
    fn next_event(&self) -> impl Future<Output = Option<ChannelEvent>> + Send;

    /// Closes the channel on both ends.
    fn close(&self);
}

/// A media call with one remote peer.
pub trait Call: Send + Sync + 'static {
    /// The stream type carried by this call.
    type Stream: MediaStream;

    /// The peer on the other end.
    fn peer_id(&self) -> &PeerId;

    /// Accepts an inbound call, optionally sending our own stream back.
    fn answer(&self, stream: Option<Self::Stream>) -> Result<(), FabricError>;

    /// Waits for the remote peer's stream.
    fn remote_stream(&self) -> impl Future<Output = Result<Self::Stream, FabricError>> + Send;
}

/// Something that happened on a local endpoint.
#[derive(Debug)]
pub enum EndpointEvent<C, K> {
    /// A remote peer opened a data channel to us.
    IncomingChannel(C),
    /// A remote peer is calling us.
    IncomingCall(K),
    /// The endpoint itself failed (signaling loss, server error).
    Error(FabricError),
}

/// The local addressable identity registered with the fabric.
pub trait Endpoint: Send + Sync + 'static {
    /// Media stream type.
    type Stream: MediaStream;
    /// Data channel type.
    type Channel: Channel;
    /// Media call type.
    type Call: Call<Stream = Self::Stream>;

    /// The id this endpoint is registered under.
    fn id(&self) -> &PeerId;

    /// Opens an outbound data channel to `remote_id`.
    ///
    /// The returned channel reports [`ChannelEvent::Open`] once usable.
    fn connect(
        &self,
        remote_id: &PeerId,
        metadata: ChannelMetadata,
    ) -> impl Future<Output = Result<Self::Channel, FabricError>> + Send;

    /// Originates a media call to `remote_id` carrying `stream`.
    fn call(
        &self,
        remote_id: &PeerId,
        stream: &Self::Stream,
    ) -> impl Future<Output = Result<Self::Call, FabricError>> + Send;

    /// Waits for the next inbound channel, inbound call, or endpoint error.
    ///
    /// Returns `None` once the endpoint is disconnected or destroyed.
    fn next_event(
        &self,
    ) -> impl Future<Output = Option<EndpointEvent<Self::Channel, Self::Call>>> + Send;

    /// Leaves the signaling server. Existing channels stay up.
    fn disconnect(&self);

    /// Closes every channel and call and releases the id.
    fn destroy(&self);
}

/// Entry point into a connection fabric.
pub trait Fabric: Send + Sync + 'static {
    /// Media stream type.
    type Stream: MediaStream;
    /// Endpoint type.
    type Endpoint: Endpoint<Stream = Self::Stream>;

    /// Starts capturing local audio.
    fn acquire_local_audio(&self) -> impl Future<Output = Result<Self::Stream, FabricError>> + Send;

    /// Registers a local endpoint under `local_id`.
    ///
    /// Resolves once the fabric confirms the endpoint is open.
    fn open(
        &self,
        local_id: &PeerId,
    ) -> impl Future<Output = Result<Self::Endpoint, FabricError>> + Send;
}

/// The channel type of a fabric.
pub type ChannelOf<F> = <<F as Fabric>::Endpoint as Endpoint>::Channel;

/// The call type of a fabric.
pub type CallOf<F> = <<F as Fabric>::Endpoint as Endpoint>::Call;
