//! In-process fabric implementation over Tokio channels.
//!
//! Every [`LoopbackFabric`] clone shares one switchboard. Endpoints
//! registered on it can open channels to each other and call each other
//! exactly as they would through a real signaling service, which makes
//! it suitable for tests and local demos. Nothing leaves the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use meshroom_protocol::{ChannelMetadata, PeerId};
use tokio::sync::{mpsc, oneshot};

use crate::{
    Call, Channel, ChannelEvent, Endpoint, EndpointEvent, Fabric, FabricError,
    MediaStream,
};

/// Counter for generating unique stream ids.
static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Counter distinguishing successive endpoints registered under one id.
static NEXT_ENDPOINT_SERIAL: AtomicU64 = AtomicU64::new(1);

type LoopbackEvent = EndpointEvent<LoopbackChannel, LoopbackCall>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How [`Fabric::acquire_local_audio`] behaves on a loopback fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Capture succeeds with a fresh stream.
    #[default]
    Available,
    /// Capture fails as if the user refused microphone access.
    Denied,
    /// Capture fails as if no input device existed.
    Unavailable,
}

/// Knobs for simulating device and signaling behavior.
#[derive(Debug, Clone, Default)]
pub struct LoopbackOptions {
    /// Result of local audio capture.
    pub capture: CaptureMode,
    /// Artificial latency before [`Fabric::open`] resolves.
    pub open_delay: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Switchboard
// ---------------------------------------------------------------------------

/// An in-process connection fabric.
///
/// Cheap to clone; all clones share the same registry of endpoints.
#[derive(Clone, Default)]
pub struct LoopbackFabric {
    inner: Arc<Switchboard>,
}

#[derive(Default)]
struct Switchboard {
    options: Mutex<LoopbackOptions>,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    endpoints: HashMap<PeerId, Registration>,
    links: Vec<Arc<Link>>,
}

struct Registration {
    serial: u64,
    events: mpsc::UnboundedSender<LoopbackEvent>,
}

/// Shared state of one data channel. Each end reads from its own queue
/// and writes into the other end's.
struct Link {
    ends: [PeerId; 2],
    owners: [u64; 2],
    queues: [mpsc::UnboundedSender<ChannelEvent>; 2],
    closed: AtomicBool,
}

impl Link {
    fn connects(&self, a: &PeerId, b: &PeerId) -> bool {
        (&self.ends[0] == a && &self.ends[1] == b)
            || (&self.ends[0] == b && &self.ends[1] == a)
    }

    fn touches(&self, serial: u64) -> bool {
        self.owners.contains(&serial)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes both ends. Returns `false` if already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for queue in &self.queues {
            let _ = queue.send(ChannelEvent::Close);
        }
        true
    }

    /// Reports `error` on both ends, then closes them.
    fn fail(&self, error: &FabricError) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for queue in &self.queues {
            let _ = queue.send(ChannelEvent::Error(error.clone()));
            let _ = queue.send(ChannelEvent::Close);
        }
        true
    }
}

impl LoopbackFabric {
    /// Creates an empty switchboard with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty switchboard with the given options.
    pub fn with_options(options: LoopbackOptions) -> Self {
        let fabric = Self::default();
        *lock(&fabric.inner.options) = options;
        fabric
    }

    /// Changes how subsequent capture requests behave.
    pub fn set_capture(&self, mode: CaptureMode) {
        lock(&self.inner.options).capture = mode;
    }

    /// Changes the latency of subsequent [`Fabric::open`] calls.
    pub fn set_open_delay(&self, delay: Option<Duration>) {
        lock(&self.inner.options).open_delay = delay;
    }

    /// Whether an endpoint is currently registered under `id`.
    pub fn is_registered(&self, id: &PeerId) -> bool {
        lock(&self.inner.registry).endpoints.contains_key(id)
    }

    /// Number of registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        lock(&self.inner.registry).endpoints.len()
    }

    /// Number of data channels that are still open.
    pub fn open_link_count(&self) -> usize {
        lock(&self.inner.registry)
            .links
            .iter()
            .filter(|link| !link.is_closed())
            .count()
    }

    /// Delivers an endpoint-level error to the endpoint registered as `id`.
    ///
    /// Returns `false` if no such endpoint is listening.
    pub fn inject_error(&self, id: &PeerId, error: FabricError) -> bool {
        lock(&self.inner.registry)
            .endpoints
            .get(id)
            .is_some_and(|reg| reg.events.send(EndpointEvent::Error(error)).is_ok())
    }

    /// Closes every channel between `a` and `b`, as if the network dropped.
    ///
    /// Returns the number of channels closed.
    pub fn sever(&self, a: &PeerId, b: &PeerId) -> usize {
        let links = self.take_links(|link| link.connects(a, b));
        let closed = links.iter().filter(|link| link.close()).count();
        tracing::debug!(%a, %b, closed, "loopback links severed");
        closed
    }

    /// Fails every channel between `a` and `b` with `error`.
    ///
    /// Returns the number of channels failed.
    pub fn fail_link(&self, a: &PeerId, b: &PeerId, error: FabricError) -> usize {
        let links = self.take_links(|link| link.connects(a, b));
        links.iter().filter(|link| link.fail(&error)).count()
    }

    fn take_links(&self, mut matches: impl FnMut(&Link) -> bool) -> Vec<Arc<Link>> {
        let mut registry = lock(&self.inner.registry);
        let all = std::mem::take(&mut registry.links);
        let (taken, kept): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|link| matches(&**link));
        registry.links = kept;
        taken
    }
}

impl fmt::Debug for LoopbackFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.inner.registry);
        f.debug_struct("LoopbackFabric")
            .field("endpoints", &registry.endpoints.len())
            .field("links", &registry.links.len())
            .finish()
    }
}

impl Fabric for LoopbackFabric {
    type Stream = LoopbackStream;
    type Endpoint = LoopbackEndpoint;

    async fn acquire_local_audio(&self) -> Result<LoopbackStream, FabricError> {
        let mode = lock(&self.inner.options).capture;
        match mode {
            CaptureMode::Available => Ok(LoopbackStream::new()),
            CaptureMode::Denied => Err(FabricError::CaptureDenied("permission denied".into())),
            CaptureMode::Unavailable => Err(FabricError::CaptureUnavailable(
                "no audio input device".into(),
            )),
        }
    }

    async fn open(&self, local_id: &PeerId) -> Result<LoopbackEndpoint, FabricError> {
        let delay = lock(&self.inner.options).open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let serial = NEXT_ENDPOINT_SERIAL.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = lock(&self.inner.registry);
            if registry.endpoints.contains_key(local_id) {
                return Err(FabricError::IdTaken(local_id.clone()));
            }
            registry
                .endpoints
                .insert(local_id.clone(), Registration { serial, events: tx });
        }
        tracing::debug!(%local_id, "loopback endpoint opened");

        Ok(LoopbackEndpoint {
            id: local_id.clone(),
            serial,
            fabric: self.clone(),
            events: tokio::sync::Mutex::new(rx),
            disconnected: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        })
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// An endpoint registered on a [`LoopbackFabric`].
///
/// Dropping it has the same effect as [`Endpoint::destroy`].
pub struct LoopbackEndpoint {
    id: PeerId,
    serial: u64,
    fabric: LoopbackFabric,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<LoopbackEvent>>,
    disconnected: AtomicBool,
    destroyed: AtomicBool,
}

impl LoopbackEndpoint {
    /// Whether [`Endpoint::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_usable(&self) -> Result<(), FabricError> {
        if self.is_destroyed() {
            return Err(FabricError::Destroyed);
        }
        if self.disconnected.load(Ordering::Acquire) {
            return Err(FabricError::Signaling("endpoint is disconnected".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for LoopbackEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackEndpoint")
            .field("id", &self.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Endpoint for LoopbackEndpoint {
    type Stream = LoopbackStream;
    type Channel = LoopbackChannel;
    type Call = LoopbackCall;

    fn id(&self) -> &PeerId {
        &self.id
    }

    async fn connect(
        &self,
        remote_id: &PeerId,
        metadata: ChannelMetadata,
    ) -> Result<LoopbackChannel, FabricError> {
        self.ensure_usable()?;

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        let mut registry = lock(&self.fabric.inner.registry);
        let registration = registry
            .endpoints
            .get(remote_id)
            .ok_or_else(|| FabricError::PeerUnavailable(remote_id.clone()))?;

        let link = Arc::new(Link {
            ends: [self.id.clone(), remote_id.clone()],
            owners: [self.serial, registration.serial],
            queues: [local_tx, remote_tx],
            closed: AtomicBool::new(false),
        });
        let remote_half =
            LoopbackChannel::new(Arc::clone(&link), 1, metadata.clone(), remote_rx);
        registration
            .events
            .send(EndpointEvent::IncomingChannel(remote_half))
            .map_err(|_| FabricError::PeerUnavailable(remote_id.clone()))?;

        for queue in &link.queues {
            let _ = queue.send(ChannelEvent::Open);
        }
        registry.links.retain(|link| !link.is_closed());
        registry.links.push(Arc::clone(&link));
        drop(registry);

        tracing::debug!(local = %self.id, remote = %remote_id, "loopback channel opened");
        Ok(LoopbackChannel::new(link, 0, metadata, local_rx))
    }

    async fn call(
        &self,
        remote_id: &PeerId,
        stream: &LoopbackStream,
    ) -> Result<LoopbackCall, FabricError> {
        self.ensure_usable()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let inbound = LoopbackCall {
            peer_id: self.id.clone(),
            side: CallSide::Callee {
                offered: stream.clone(),
                reply: Mutex::new(Some(reply_tx)),
                answered: AtomicBool::new(false),
            },
        };
        {
            let registry = lock(&self.fabric.inner.registry);
            let registration = registry
                .endpoints
                .get(remote_id)
                .ok_or_else(|| FabricError::PeerUnavailable(remote_id.clone()))?;
            registration
                .events
                .send(EndpointEvent::IncomingCall(inbound))
                .map_err(|_| FabricError::PeerUnavailable(remote_id.clone()))?;
        }
        tracing::debug!(local = %self.id, remote = %remote_id, "loopback call placed");

        Ok(LoopbackCall {
            peer_id: remote_id.clone(),
            side: CallSide::Caller {
                reply: tokio::sync::Mutex::new(Some(reply_rx)),
            },
        })
    }

    async fn next_event(&self) -> Option<LoopbackEvent> {
        if self.is_destroyed() {
            return None;
        }
        self.events.lock().await.recv().await
    }

    fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut registry = lock(&self.fabric.inner.registry);
        let ours = registry
            .endpoints
            .get(&self.id)
            .is_some_and(|reg| reg.serial == self.serial);
        if ours {
            registry.endpoints.remove(&self.id);
        }
        tracing::debug!(id = %self.id, "loopback endpoint disconnected");
    }

    fn destroy(&self) {
        self.disconnect();
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let links = self.fabric.take_links(|link| link.touches(self.serial));
        for link in &links {
            link.close();
        }
        tracing::debug!(id = %self.id, closed = links.len(), "loopback endpoint destroyed");
    }
}

impl Drop for LoopbackEndpoint {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// One end of a loopback data channel.
#[derive(Clone)]
pub struct LoopbackChannel {
    link: Arc<Link>,
    side: usize,
    metadata: ChannelMetadata,
    events: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>>,
}

impl LoopbackChannel {
    fn new(
        link: Arc<Link>,
        side: usize,
        metadata: ChannelMetadata,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            link,
            side,
            metadata,
            events: Arc::new(tokio::sync::Mutex::new(events)),
        }
    }

    /// The endpoint id on our side of the channel.
    pub fn local_id(&self) -> &PeerId {
        &self.link.ends[self.side]
    }

    /// Whether either side has closed the channel.
    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }
}

impl fmt::Debug for LoopbackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackChannel")
            .field("local", self.local_id())
            .field("remote", self.remote_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel for LoopbackChannel {
    fn remote_id(&self) -> &PeerId {
        &self.link.ends[1 - self.side]
    }

    fn metadata(&self) -> &ChannelMetadata {
        &self.metadata
    }

    async fn send(&self, data: &[u8]) -> Result<(), FabricError> {
        if self.link.is_closed() {
            return Err(FabricError::ChannelClosed(self.remote_id().clone()));
        }
        self.link.queues[1 - self.side]
            .send(ChannelEvent::Data(data.to_vec()))
            .map_err(|_| FabricError::ChannelClosed(self.remote_id().clone()))
    }

    async fn next_event(&self) -> Option<ChannelEvent> {
        let mut events = self.events.lock().await;
        if self.link.is_closed() {
            // Drain what was queued before the close, then report the end.
            return events.try_recv().ok();
        }
        events.recv().await
    }

    fn close(&self) {
        if self.link.close() {
            tracing::debug!(
                local = %self.local_id(),
                remote = %self.remote_id(),
                "loopback channel closed"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// One end of a loopback media call.
pub struct LoopbackCall {
    peer_id: PeerId,
    side: CallSide,
}

enum CallSide {
    /// We placed the call and wait for the callee's answer.
    Caller {
        reply: tokio::sync::Mutex<Option<oneshot::Receiver<Option<LoopbackStream>>>>,
    },
    /// We received the call; `offered` is the caller's stream.
    Callee {
        offered: LoopbackStream,
        reply: Mutex<Option<oneshot::Sender<Option<LoopbackStream>>>>,
        answered: AtomicBool,
    },
}

impl fmt::Debug for LoopbackCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.side {
            CallSide::Caller { .. } => "outbound",
            CallSide::Callee { .. } => "inbound",
        };
        f.debug_struct("LoopbackCall")
            .field("peer_id", &self.peer_id)
            .field("direction", &direction)
            .finish()
    }
}

impl Call for LoopbackCall {
    type Stream = LoopbackStream;

    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn answer(&self, stream: Option<LoopbackStream>) -> Result<(), FabricError> {
        match &self.side {
            CallSide::Caller { .. } => Err(FabricError::Negotiation(
                "cannot answer an outbound call".into(),
            )),
            CallSide::Callee {
                reply, answered, ..
            } => {
                let sender = lock(reply).take().ok_or_else(|| {
                    FabricError::Negotiation("call already answered".into())
                })?;
                answered.store(true, Ordering::Release);
                sender.send(stream).map_err(|_| {
                    FabricError::Negotiation(format!("{} hung up", self.peer_id))
                })
            }
        }
    }

    async fn remote_stream(&self) -> Result<LoopbackStream, FabricError> {
        match &self.side {
            CallSide::Callee {
                offered, answered, ..
            } => {
                if answered.load(Ordering::Acquire) {
                    Ok(offered.clone())
                } else {
                    Err(FabricError::Negotiation("call not answered".into()))
                }
            }
            CallSide::Caller { reply } => {
                let receiver = reply.lock().await.take().ok_or_else(|| {
                    FabricError::Negotiation("remote stream already taken".into())
                })?;
                match receiver.await {
                    Ok(Some(stream)) => Ok(stream),
                    Ok(None) => Err(FabricError::Negotiation(format!(
                        "{} answered without media",
                        self.peer_id
                    ))),
                    Err(_) => Err(FabricError::Negotiation(format!(
                        "{} dropped the call",
                        self.peer_id
                    ))),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// A simulated audio stream. Clones share the active flag.
#[derive(Debug, Clone)]
pub struct LoopbackStream {
    id: Arc<str>,
    active: Arc<AtomicBool>,
}

impl LoopbackStream {
    fn new() -> Self {
        let n = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("audio-{n}").into(),
            active: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl PartialEq for LoopbackStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LoopbackStream {}

impl MediaStream for LoopbackStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
