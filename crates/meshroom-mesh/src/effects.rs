//! Side effects for the `Initializing` and `Ready` states.

use std::sync::Arc;

use meshroom_fabric::{
    Call, CallOf, Channel, ChannelEvent, ChannelOf, Endpoint, EndpointEvent, Fabric, FabricError,
    MediaStream,
};
use meshroom_protocol::{ChannelMetadata, Codec, PeerId, PeerMessage};
use meshroom_session::{ConnectionError, Epoch, Intent, Membership, ReadySession, Role, Stage};
use tokio::task::JoinHandle;

use crate::orchestrator::{Context, Slot, close_endpoint, lock};
use crate::{AudioSink, MeshError};

// ---------------------------------------------------------------------------
// Initializing
// ---------------------------------------------------------------------------

struct Established<F: Fabric> {
    stream: F::Stream,
    endpoint: F::Endpoint,
    guest_channel: Option<ChannelOf<F>>,
}

/// Brings a new session up and reports the result for `epoch`.
pub(crate) async fn establish_session<F, A>(
    ctx: Arc<Context<F, A>>,
    epoch: Epoch,
    membership: Membership,
    slot: Slot<F>,
) where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    let established = match acquire(&ctx.fabric, &membership).await {
        Ok(established) => established,
        Err(error) => {
            tracing::warn!(
                %epoch,
                local_id = %membership.local_id(),
                code = error.code(),
                %error,
                "session failed to start"
            );
            ctx.machine.dispatch_for(epoch, Intent::ConnectionFailed { error });
            return;
        }
    };

    let Established {
        stream,
        endpoint,
        guest_channel,
    } = established;
    if !lock(&slot).install(Arc::new(endpoint), stream.clone(), guest_channel) {
        tracing::debug!(%epoch, "attempt abandoned while starting; resources released");
        return;
    }

    if ctx.machine.dispatch_for(epoch, Intent::MediaAcquired { stream }) {
        tracing::info!(
            %epoch,
            local_id = %membership.local_id(),
            role = %membership.role(),
            "session established"
        );
    } else {
        tracing::debug!(%epoch, "session moved on while starting; resources released");
        lock(&slot).release();
    }
}

/// Microphone, then endpoint, then (guests only) the channel to the host.
///
/// On failure everything acquired so far is released before returning.
async fn acquire<F: Fabric>(
    fabric: &F,
    membership: &Membership,
) -> Result<Established<F>, ConnectionError> {
    let stream = fabric
        .acquire_local_audio()
        .await
        .map_err(ConnectionError::Capture)?;

    let endpoint = match fabric.open(membership.local_id()).await {
        Ok(endpoint) => endpoint,
        Err(source) => {
            stream.stop();
            return Err(ConnectionError::endpoint(Stage::Opening, source));
        }
    };

    let guest_channel = match membership.role() {
        Role::Host => None,
        Role::Guest { remote_id } => {
            let metadata = ChannelMetadata::new(
                membership.display_name(),
                membership.local_id().clone(),
            );
            match endpoint.connect(remote_id, metadata).await {
                Ok(channel) => Some(channel),
                Err(source) => {
                    close_endpoint(&endpoint);
                    stream.stop();
                    return Err(ConnectionError::endpoint(Stage::Connecting, source));
                }
            }
        }
    };

    Ok(Established {
        stream,
        endpoint,
        guest_channel,
    })
}

// ---------------------------------------------------------------------------
// Ready
// ---------------------------------------------------------------------------

/// State shared by the listener tasks of one `Ready` instance.
struct Room<F: Fabric, A> {
    ctx: Arc<Context<F, A>>,
    epoch: Epoch,
    endpoint: Arc<F::Endpoint>,
    local_stream: F::Stream,
    is_host: bool,
    slot: Slot<F>,
}

/// Starts the listeners for a session that just became ready.
pub(crate) fn enter_room<F, A>(
    ctx: &Arc<Context<F, A>>,
    epoch: Epoch,
    ready: ReadySession<F::Stream, ChannelOf<F>>,
    slot: &Slot<F>,
) where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    let (endpoint, guest_channel) = {
        let resources = lock(slot);
        (resources.endpoint(), resources.guest_channel())
    };
    let Some(endpoint) = endpoint else {
        tracing::error!(%epoch, "ready session has no endpoint; ignoring");
        return;
    };

    let membership = ready.membership();
    tracing::info!(
        %epoch,
        local_id = %membership.local_id(),
        role = %membership.role(),
        "entered room"
    );

    let room = Arc::new(Room {
        ctx: Arc::clone(ctx),
        epoch,
        endpoint,
        local_stream: ready.local_stream().clone(),
        is_host: membership.is_host(),
        slot: Arc::clone(slot),
    });

    room.track(tokio::spawn(serve_endpoint(Arc::clone(&room))));
    if let Some(channel) = guest_channel {
        room.track(tokio::spawn(serve_host(Arc::clone(&room), channel)));
    }
}

impl<F, A> Room<F, A>
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    fn track(&self, handle: JoinHandle<()>) {
        lock(&self.slot).track(handle);
    }

    fn dispatch(&self, intent: Intent<F::Stream, ChannelOf<F>>) -> bool {
        self.ctx.machine.dispatch_for(self.epoch, intent)
    }

    async fn send(&self, channel: &ChannelOf<F>, message: &PeerMessage) {
        let peer_id = channel.remote_id();
        let result = match self.ctx.codec.encode(message) {
            Ok(bytes) => channel
                .send(&bytes)
                .await
                .map_err(|source| MeshError::Channel {
                    peer_id: peer_id.clone(),
                    source,
                }),
            Err(error) => Err(MeshError::Payload(error)),
        };
        match result {
            Ok(()) => tracing::debug!(%peer_id, ?message, "payload sent"),
            Err(error) => tracing::warn!(%peer_id, %error, "payload not sent"),
        }
    }

    fn receive(&self, peer_id: &PeerId, bytes: &[u8]) {
        match self.ctx.codec.decode::<PeerMessage>(bytes) {
            Ok(PeerMessage::Hello { text }) => {
                tracing::info!(%peer_id, %text, "greeting received");
            }
            Ok(PeerMessage::Ping) => tracing::debug!(%peer_id, "ping received"),
            Err(error) => {
                let error = MeshError::from(error);
                tracing::warn!(%peer_id, %error, "unreadable payload ignored");
            }
        }
    }

    fn play(&self, peer_id: &PeerId, stream: F::Stream) {
        tracing::info!(%peer_id, stream_id = stream.id(), "remote audio connected");
        self.ctx.sink.play(peer_id, stream);
    }

    async fn dial(&self, peer_id: &PeerId) -> Result<F::Stream, FabricError> {
        let call = self.endpoint.call(peer_id, &self.local_stream).await?;
        call.remote_stream().await
    }
}

/// Reacts to inbound channels, inbound calls, and endpoint failure.
async fn serve_endpoint<F, A>(room: Arc<Room<F, A>>)
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    while let Some(event) = room.endpoint.next_event().await {
        match event {
            EndpointEvent::IncomingChannel(channel) if room.is_host => {
                room.track(tokio::spawn(serve_peer(Arc::clone(&room), channel)));
            }
            EndpointEvent::IncomingChannel(channel) => {
                tracing::debug!(
                    peer_id = %channel.remote_id(),
                    "guests do not accept channels; closing"
                );
                channel.close();
            }
            EndpointEvent::IncomingCall(call) => {
                room.track(tokio::spawn(answer_call(Arc::clone(&room), call)));
            }
            EndpointEvent::Error(source) => {
                tracing::error!(
                    epoch = %room.epoch,
                    code = source.code(),
                    error = %source,
                    "endpoint failed"
                );
                room.dispatch(Intent::ConnectionFailed {
                    error: ConnectionError::endpoint(Stage::Live, source),
                });
                return;
            }
        }
    }
    tracing::debug!(epoch = %room.epoch, "endpoint events ended");
}

/// Host side of one guest's channel: admit on open, evict on close.
async fn serve_peer<F, A>(room: Arc<Room<F, A>>, channel: ChannelOf<F>)
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    let peer_id = channel.remote_id().clone();
    let display_name = channel.metadata().display_name.clone();

    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Open) => {
                tracing::info!(%peer_id, %display_name, epoch = %room.epoch, "peer joined");
                room.dispatch(Intent::PeerJoined {
                    peer_id: peer_id.clone(),
                    channel: channel.clone(),
                });
                if room.ctx.config.call_joining_peers {
                    room.track(tokio::spawn(place_call(Arc::clone(&room), peer_id.clone())));
                }
                room.send(&channel, &PeerMessage::Ping).await;
            }
            Some(ChannelEvent::Data(bytes)) => room.receive(&peer_id, &bytes),
            Some(ChannelEvent::Error(source)) => {
                let error = MeshError::Channel {
                    peer_id: peer_id.clone(),
                    source,
                };
                tracing::warn!(%error, "peer channel failed");
                break;
            }
            Some(ChannelEvent::Close) | None => break,
        }
    }

    tracing::info!(%peer_id, %display_name, epoch = %room.epoch, "peer left");
    room.dispatch(Intent::PeerLeft { peer_id });
}

/// Guest side of the channel to the host.
async fn serve_host<F, A>(room: Arc<Room<F, A>>, channel: ChannelOf<F>)
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    let host_id = channel.remote_id().clone();

    loop {
        match channel.next_event().await {
            Some(ChannelEvent::Open) => {
                let greeting = PeerMessage::Hello {
                    text: room.ctx.config.greeting.clone(),
                };
                room.send(&channel, &greeting).await;
                tracing::info!(%host_id, epoch = %room.epoch, "connected to host");
                room.dispatch(Intent::PeerJoined {
                    peer_id: host_id.clone(),
                    channel: channel.clone(),
                });
            }
            Some(ChannelEvent::Data(bytes)) => room.receive(&host_id, &bytes),
            Some(ChannelEvent::Error(source)) => {
                let error = MeshError::Channel {
                    peer_id: host_id.clone(),
                    source,
                };
                tracing::warn!(%error, "channel to host failed");
                break;
            }
            Some(ChannelEvent::Close) | None => break,
        }
    }

    tracing::info!(%host_id, epoch = %room.epoch, "host left");
    room.dispatch(Intent::PeerLeft { peer_id: host_id });
}

/// Calls a newly admitted peer with our microphone.
///
/// A failed call is logged; the peer stays in the roster.
async fn place_call<F, A>(room: Arc<Room<F, A>>, peer_id: PeerId)
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    match room.dial(&peer_id).await {
        Ok(stream) => room.play(&peer_id, stream),
        Err(source) => {
            let error = MeshError::Call { peer_id, source };
            tracing::warn!(%error, "outbound call failed");
        }
    }
}

/// Answers an inbound call and plays the caller's audio.
async fn answer_call<F, A>(room: Arc<Room<F, A>>, call: CallOf<F>)
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    let peer_id = call.peer_id().clone();
    let reply = room
        .ctx
        .config
        .answer_with_local_stream
        .then(|| room.local_stream.clone());

    let result = match call.answer(reply) {
        Ok(()) => call.remote_stream().await,
        Err(source) => Err(source),
    };
    match result {
        Ok(stream) => room.play(&peer_id, stream),
        Err(source) => {
            let error = MeshError::Call { peer_id, source };
            tracing::warn!(%error, "inbound call failed");
        }
    }
}
