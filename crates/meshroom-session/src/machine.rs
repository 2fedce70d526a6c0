//! The shared, observable session machine.
//!
//! [`SessionMachine`] holds the one authoritative [`Snapshot`] of a
//! participant's session. Dispatching an intent runs the pure transition
//! under the snapshot's lock, so concurrent dispatches are serialized
//! and every observer sees each change whole.
//!
//! # Epochs
//!
//! Each time the session enters a new state variant, the snapshot's
//! [`Epoch`] advances. Side effects started for one state capture its
//! epoch and report back with [`SessionMachine::dispatch_for`]; if the
//! session has moved on in the meantime, the report is dropped.
//!
//! ```text
//! epoch 1: Initializing ── effect starts (captures E-1)
//! epoch 2: Idle         ── user left
//!          effect finishes: dispatch_for(E-1, MediaAcquired) → discarded
//! ```

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::{ConnectionError, IdentityGenerator, Intent, Outcome, RandomIdentity, Session};

/// Identifies one state instance.
///
/// Advances on every variant change (`Idle → Initializing`, …). Roster
/// updates inside `Ready` keep the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Epoch(u64);

impl Epoch {
    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E-{}", self.0)
    }
}

/// A consistent view of the machine.
#[derive(Debug, Clone)]
pub struct Snapshot<S, C> {
    /// Which state instance this is.
    pub epoch: Epoch,
    /// Number of session attempts (create/join) accepted so far.
    pub attempt: u64,
    /// The session itself.
    pub session: Session<S, C>,
    /// Why the most recent attempt ended, if it failed. Cleared when the
    /// next attempt starts.
    pub last_error: Option<ConnectionError>,
}

impl<S, C> Snapshot<S, C> {
    fn initial() -> Self {
        Self {
            epoch: Epoch::default(),
            attempt: 0,
            session: Session::Idle,
            last_error: None,
        }
    }
}

struct Shared<S, C> {
    state: watch::Sender<Snapshot<S, C>>,
    ids: Box<dyn IdentityGenerator>,
}

/// Owner of the participant's session.
///
/// Cheap to clone; clones share the same state. Reads never block on
/// async work and dispatch never awaits.
pub struct SessionMachine<S, C> {
    inner: Arc<Shared<S, C>>,
}

impl<S, C> Clone for SessionMachine<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C> fmt::Debug for SessionMachine<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("SessionMachine")
            .field("epoch", &state.epoch)
            .field("attempt", &state.attempt)
            .field("kind", &state.session.kind())
            .finish()
    }
}

impl<S, C> SessionMachine<S, C>
where
    S: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    /// Creates an idle machine drawing new ids from `ids`.
    pub fn new(ids: impl IdentityGenerator) -> Self {
        let (state, _) = watch::channel(Snapshot::initial());
        Self {
            inner: Arc::new(Shared {
                state,
                ids: Box::new(ids),
            }),
        }
    }

    /// Applies `intent` to the current state.
    ///
    /// Observers are notified only if something changed.
    pub fn dispatch(&self, intent: impl Into<Intent<S, C>>) -> Outcome {
        self.apply(None, intent.into())
    }

    /// Applies `intent` only if the session is still at `epoch`.
    ///
    /// Used by side effects: a result produced for a state that is no
    /// longer current is discarded. Returns whether the intent was applied.
    pub fn dispatch_for(&self, epoch: Epoch, intent: impl Into<Intent<S, C>>) -> bool {
        self.apply(Some(epoch), intent.into()).is_applied()
    }

    fn apply(&self, expected: Option<Epoch>, intent: Intent<S, C>) -> Outcome {
        let name = intent.name();
        let mut outcome = Outcome::Ignored;
        let mut stale = None;

        // `send_if_modified` hands us `&mut Snapshot` while holding the
        // channel's write lock. Two threads dispatching at once therefore
        // run one after the other, and no receiver can observe a snapshot
        // half-way through a transition. The closure's return value decides
        // whether receivers are woken: `false` for stale or ignored intents,
        // so a no-op never looks like a change.
        //
        // The closure must stay synchronous and short. Never `.await` or
        // call back into the machine from here; that would deadlock on the
        // lock we are holding.
        self.inner.state.send_if_modified(|snapshot| {
            if let Some(expected) = expected.filter(|e| *e != snapshot.epoch) {
                stale = Some((expected, snapshot.epoch));
                return false;
            }

            let starts_attempt = intent.starts_attempt();
            let failure = match &intent {
                Intent::ConnectionFailed { error } => Some(error.clone()),
                _ => None,
            };

            outcome = snapshot.session.apply(intent, self.inner.ids.as_ref());
            match outcome {
                Outcome::Ignored => false,
                Outcome::Updated => true,
                Outcome::Entered => {
                    snapshot.epoch = snapshot.epoch.next();
                    if starts_attempt {
                        snapshot.attempt += 1;
                        snapshot.last_error = None;
                    }
                    if failure.is_some() {
                        snapshot.last_error = failure;
                    }
                    true
                }
            }
        });

        if let Some((expected, current)) = stale {
            tracing::debug!(intent = name, %expected, %current, "stale intent discarded");
            return outcome;
        }

        match outcome {
            Outcome::Entered => {
                let state = self.inner.state.borrow();
                tracing::debug!(
                    intent = name,
                    epoch = %state.epoch,
                    attempt = state.attempt,
                    state = %state.session.kind(),
                    "session transitioned"
                );
            }
            Outcome::Updated => tracing::trace!(intent = name, "session updated"),
            Outcome::Ignored => tracing::trace!(intent = name, "intent ignored"),
        }
        outcome
    }

    /// A copy of the current snapshot.
    pub fn current_state(&self) -> Snapshot<S, C> {
        self.inner.state.borrow().clone()
    }

    /// The current epoch.
    pub fn epoch(&self) -> Epoch {
        self.inner.state.borrow().epoch
    }

    /// Returns `true` if the session is still at `epoch`.
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch() == epoch
    }

    /// Observes every change.
    ///
    /// The receiver starts with the current snapshot marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<S, C>> {
        self.inner.state.subscribe()
    }
}

impl<S, C> Default for SessionMachine<S, C>
where
    S: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(RandomIdentity)
    }
}
