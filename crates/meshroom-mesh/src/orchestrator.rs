//! Orchestrator actor: an isolated Tokio task that follows the session.
//!
//! The task subscribes to the machine's `watch` channel and reacts to
//! each new state instance exactly once. Roster updates inside `Ready`
//! keep the epoch and are skipped.
//!
//! Everything acquired for one create/join attempt lives in that
//! attempt's [`Resources`] slot. Leaving the attempt (observing `Idle`
//! or a newer attempt) releases the slot; effects that finish later find
//! it closed and release what they hold themselves.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshroom_fabric::{Channel, ChannelOf, Endpoint, Fabric, MediaStream};
use meshroom_protocol::JsonCodec;
use meshroom_session::{Epoch, Session, SessionMachine, Snapshot};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{AudioSink, MeshConfig, MeshError, effects};

/// The session machine driven by a fabric `F`.
pub type MachineOf<F> = SessionMachine<<F as Fabric>::Stream, ChannelOf<F>>;

/// A snapshot of [`MachineOf<F>`].
pub type SnapshotOf<F> = Snapshot<<F as Fabric>::Stream, ChannelOf<F>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn close_endpoint<E: Endpoint>(endpoint: &E) {
    endpoint.disconnect();
    endpoint.destroy();
}

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// What every effect task needs.
pub(crate) struct Context<F: Fabric, A> {
    pub(crate) fabric: F,
    pub(crate) sink: A,
    pub(crate) machine: MachineOf<F>,
    pub(crate) config: MeshConfig,
    pub(crate) codec: JsonCodec,
}

// ---------------------------------------------------------------------------
// Per-attempt resources
// ---------------------------------------------------------------------------

pub(crate) type Slot<F> = Arc<Mutex<Resources<F>>>;

/// Fabric resources owned by one session attempt.
pub(crate) struct Resources<F: Fabric> {
    closed: bool,
    endpoint: Option<Arc<F::Endpoint>>,
    stream: Option<F::Stream>,
    guest_channel: Option<ChannelOf<F>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<F: Fabric> Resources<F> {
    fn new() -> Self {
        Self {
            closed: false,
            endpoint: None,
            stream: None,
            guest_channel: None,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn endpoint(&self) -> Option<Arc<F::Endpoint>> {
        self.endpoint.clone()
    }

    pub(crate) fn guest_channel(&self) -> Option<ChannelOf<F>> {
        self.guest_channel.clone()
    }

    /// Stores what the startup effect acquired.
    ///
    /// If the attempt was already released, the resources are released
    /// on the spot and `false` is returned.
    ///
    /// ## Why the `closed` flag matters
    ///
    /// The startup effect runs on its own task and may still be inside
    /// `fabric.open(..)` when the orchestrator moves on (the user left, or
    /// a new attempt started). The orchestrator cannot cancel resources it
    /// has never seen, so instead it marks the slot `closed`. Whoever
    /// touches the slot afterwards sees the flag under the same mutex:
    ///
    /// ```text
    /// orchestrator: release()  → closed = true, nothing to free yet
    /// effect:       install(…) → sees closed, disconnects + stops itself
    /// ```
    ///
    /// Either side may come first; the mutex makes the hand-off exact, so
    /// an endpoint is never leaked and never closed twice.
    pub(crate) fn install(
        &mut self,
        endpoint: Arc<F::Endpoint>,
        stream: F::Stream,
        guest_channel: Option<ChannelOf<F>>,
    ) -> bool {
        self.endpoint = Some(endpoint);
        self.stream = Some(stream);
        self.guest_channel = guest_channel;
        if self.closed {
            self.release();
            return false;
        }
        true
    }

    /// Keeps `handle` so it is aborted on release.
    pub(crate) fn track(&mut self, handle: JoinHandle<()>) {
        if self.closed {
            handle.abort();
            return;
        }
        self.tasks.retain(|task| !task.is_finished());
        self.tasks.push(handle);
    }

    /// Aborts listeners, closes the endpoint, stops the microphone.
    /// Idempotent.
    pub(crate) fn release(&mut self) {
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(channel) = self.guest_channel.take() {
            channel.close();
        }
        if let Some(endpoint) = self.endpoint.take() {
            close_endpoint(&*endpoint);
            tracing::debug!(local_id = %endpoint.id(), "endpoint closed");
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
            tracing::debug!(stream_id = stream.id(), "local audio stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Commands sent to the orchestrator through its channel.
#[derive(Debug)]
enum MeshCommand {
    /// Release everything and stop.
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running orchestrator.
///
/// Dropping the handle stops the orchestrator as well, after it has
/// released the current attempt's resources.
#[derive(Debug)]
pub struct MeshHandle {
    sender: mpsc::Sender<MeshCommand>,
    task: JoinHandle<()>,
}

impl MeshHandle {
    /// Whether the orchestrator task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Releases the current session's resources and stops the task.
    pub async fn shutdown(self) -> Result<(), MeshError> {
        let (reply, done) = oneshot::channel();
        self.sender
            .send(MeshCommand::Shutdown { reply })
            .await
            .map_err(|_| MeshError::Stopped)?;
        done.await.map_err(|_| MeshError::Stopped)?;
        self.task.await.map_err(|_| MeshError::Stopped)
    }
}

/// Spawns the orchestrator for `machine` and returns its handle.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_mesh<F, A>(fabric: F, machine: MachineOf<F>, sink: A, config: MeshConfig) -> MeshHandle
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    let (sender, commands) = mpsc::channel(8);
    let state = machine.subscribe();
    let ctx = Arc::new(Context {
        fabric,
        sink,
        machine,
        config,
        codec: JsonCodec,
    });
    let orchestrator = Orchestrator {
        ctx,
        state,
        commands,
        seen: Epoch::default(),
        attempt: None,
    };
    let task = tokio::spawn(orchestrator.run());
    MeshHandle { sender, task }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// The attempt currently holding resources.
struct Attempt<F: Fabric> {
    number: u64,
    slot: Slot<F>,
}

struct Orchestrator<F: Fabric, A> {
    ctx: Arc<Context<F, A>>,
    state: watch::Receiver<SnapshotOf<F>>,
    commands: mpsc::Receiver<MeshCommand>,
    /// Epoch of the last state instance acted upon.
    seen: Epoch,
    attempt: Option<Attempt<F>>,
}

impl<F, A> Orchestrator<F, A>
where
    F: Fabric,
    A: AudioSink<F::Stream>,
{
    async fn run(mut self) {
        tracing::info!("mesh orchestrator started");

        let initial = self.state.borrow_and_update().clone();
        self.observe(initial);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(MeshCommand::Shutdown { reply }) => {
                            self.release();
                            let _ = reply.send(());
                        }
                        None => self.release(),
                    }
                    break;
                }
                changed = self.state.changed() => {
                    if changed.is_err() {
                        self.release();
                        break;
                    }
                    let snapshot = self.state.borrow_and_update().clone();
                    self.observe(snapshot);
                }
            }
        }

        tracing::info!("mesh orchestrator stopped");
    }

    fn observe(&mut self, snapshot: SnapshotOf<F>) {
        if snapshot.epoch == self.seen {
            return;
        }
        self.seen = snapshot.epoch;
        let epoch = snapshot.epoch;

        match snapshot.session {
            Session::Idle => {
                self.release();
                if let Some(error) = &snapshot.last_error {
                    tracing::info!(%epoch, %error, "session ended with an error");
                }
            }
            Session::Initializing(membership) => {
                self.release();
                tracing::info!(
                    %epoch,
                    attempt = snapshot.attempt,
                    local_id = %membership.local_id(),
                    role = %membership.role(),
                    "starting session"
                );
                let slot: Slot<F> = Arc::new(Mutex::new(Resources::new()));
                tokio::spawn(effects::establish_session(
                    Arc::clone(&self.ctx),
                    epoch,
                    membership,
                    Arc::clone(&slot),
                ));
                self.attempt = Some(Attempt {
                    number: snapshot.attempt,
                    slot,
                });
            }
            Session::Ready(ready) => match &self.attempt {
                Some(attempt) if attempt.number == snapshot.attempt => {
                    effects::enter_room(&self.ctx, epoch, ready, &attempt.slot);
                }
                _ => {
                    tracing::error!(
                        %epoch,
                        attempt = snapshot.attempt,
                        "ready session has no resources; ignoring"
                    );
                }
            },
        }
    }

    fn release(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            tracing::debug!(attempt = attempt.number, "releasing session resources");
            lock(&attempt.slot).release();
        }
    }
}
