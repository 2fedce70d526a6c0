//! Session states, intents, and the pure transition function.
//!
//! A participant is always in exactly one of three states:
//!
//! ```text
//!            CreateRoom / JoinRoom
//!   Idle ─────────────────────────────▶ Initializing
//!    ▲  ▲                                  │     │
//!    │  └──────── ConnectionFailed ────────┘     │ MediaAcquired
//!    │                                           ▼
//!    └──── LeaveRoom / ConnectionFailed ───── Ready ◀─┐
//!                                                │    │ PeerJoined / PeerLeft
//!                                                └────┘
//! ```
//!
//! Every (state, intent) pair not on this diagram is a no-op: the state
//! is returned unchanged and [`Outcome::Ignored`] is reported.

use std::fmt;

use meshroom_protocol::PeerId;

use crate::{ConnectionError, IdentityGenerator, Roster};

// ---------------------------------------------------------------------------
// Membership
// ---------------------------------------------------------------------------

/// Whether this participant created the room or joined someone else's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    /// Created the room; our id is the room code.
    Host,
    /// Joined the room hosted by `remote_id`.
    Guest {
        /// The host's id.
        remote_id: PeerId,
    },
}

impl Role {
    /// Returns `true` for [`Role::Host`].
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }

    /// The host's id when we are a guest.
    pub fn remote_id(&self) -> Option<&PeerId> {
        match self {
            Self::Host => None,
            Self::Guest { remote_id } => Some(remote_id),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Guest { .. } => f.write_str("guest"),
        }
    }
}

/// Who we are in the current session.
///
/// Fixed when the session starts and carried unchanged from
/// `Initializing` into `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    local_id: PeerId,
    display_name: String,
    role: Role,
}

impl Membership {
    /// Our endpoint id for this session.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// The name the user typed in.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Host or guest.
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// The host's id when we are a guest.
    pub fn remote_id(&self) -> Option<&PeerId> {
        self.role.remote_id()
    }

    /// Returns `true` if we created the room.
    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// A fully established session: endpoint open, microphone live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySession<S, C> {
    membership: Membership,
    local_stream: S,
    roster: Roster<C>,
}

impl<S, C> ReadySession<S, C> {
    /// Who we are.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Our endpoint id.
    pub fn local_id(&self) -> &PeerId {
        self.membership.local_id()
    }

    /// The captured microphone stream.
    pub fn local_stream(&self) -> &S {
        &self.local_stream
    }

    /// Currently connected peers.
    pub fn roster(&self) -> &Roster<C> {
        &self.roster
    }
}

/// The participant's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session<S, C> {
    /// Not in a room. Waiting for the user to create or join one.
    Idle,
    /// Acquiring the microphone and opening the endpoint.
    Initializing(Membership),
    /// In the room.
    Ready(ReadySession<S, C>),
}

/// Discriminant of a [`Session`], for logging and matching without data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Idle,
    Initializing,
    Ready,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Initializing => f.write_str("initializing"),
            Self::Ready => f.write_str("ready"),
        }
    }
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

/// Everything that can happen to a session.
///
/// The first three come from the user (see [`RoomCommand`]); the rest are
/// fed back by the mesh orchestrator as side effects complete.
#[derive(Debug)]
pub enum Intent<S, C> {
    /// Host a new room.
    CreateRoom { display_name: String },
    /// Join the room hosted by `remote_id`.
    JoinRoom {
        display_name: String,
        remote_id: PeerId,
    },
    /// Leave the room.
    LeaveRoom,
    /// Microphone captured and endpoint open.
    MediaAcquired { stream: S },
    /// The current attempt or live session failed.
    ConnectionFailed { error: ConnectionError },
    /// A peer's channel opened.
    PeerJoined { peer_id: PeerId, channel: C },
    /// A peer's channel closed or failed.
    PeerLeft { peer_id: PeerId },
}

impl<S, C> Intent<S, C> {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRoom { .. } => "create_room",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom => "leave_room",
            Self::MediaAcquired { .. } => "media_acquired",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
        }
    }

    /// Returns `true` for the intents that start a new session attempt.
    pub fn starts_attempt(&self) -> bool {
        matches!(self, Self::CreateRoom { .. } | Self::JoinRoom { .. })
    }
}

/// The user-facing subset of [`Intent`].
///
/// This is all a presentation layer can ask for; the remaining intents
/// belong to the mesh orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCommand {
    CreateRoom { display_name: String },
    JoinRoom {
        display_name: String,
        remote_id: PeerId,
    },
    LeaveRoom,
}

impl<S, C> From<RoomCommand> for Intent<S, C> {
    fn from(command: RoomCommand) -> Self {
        match command {
            RoomCommand::CreateRoom { display_name } => Self::CreateRoom { display_name },
            RoomCommand::JoinRoom {
                display_name,
                remote_id,
            } => Self::JoinRoom {
                display_name,
                remote_id,
            },
            RoomCommand::LeaveRoom => Self::LeaveRoom,
        }
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// What applying an intent did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The pair is not in the transition table; nothing changed.
    Ignored,
    /// Same variant, different data (roster changes inside `Ready`).
    Updated,
    /// A new state variant was entered.
    Entered,
}

impl Outcome {
    /// Returns `true` unless the intent was ignored.
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

impl<S, C> Session<S, C> {
    /// The state's discriminant.
    pub fn kind(&self) -> SessionKind {
        match self {
            Self::Idle => SessionKind::Idle,
            Self::Initializing(_) => SessionKind::Initializing,
            Self::Ready(_) => SessionKind::Ready,
        }
    }

    /// Returns `true` for [`Session::Idle`].
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Our membership, unless idle.
    pub fn membership(&self) -> Option<&Membership> {
        match self {
            Self::Idle => None,
            Self::Initializing(membership) => Some(membership),
            Self::Ready(ready) => Some(&ready.membership),
        }
    }

    /// The ready session, if established.
    pub fn as_ready(&self) -> Option<&ReadySession<S, C>> {
        match self {
            Self::Ready(ready) => Some(ready),
            _ => None,
        }
    }

    /// The roster, if established.
    pub fn roster(&self) -> Option<&Roster<C>> {
        self.as_ready().map(ReadySession::roster)
    }

    /// Exhaustive case analysis: exactly one of the three handlers runs.
    pub fn fold<R>(
        &self,
        idle: impl FnOnce() -> R,
        initializing: impl FnOnce(&Membership) -> R,
        ready: impl FnOnce(&ReadySession<S, C>) -> R,
    ) -> R {
        match self {
            Self::Idle => idle(),
            Self::Initializing(membership) => initializing(membership),
            Self::Ready(session) => ready(session),
        }
    }

    /// Applies `intent` in place.
    ///
    /// `ids` is consulted only when a new session starts.
    pub fn apply(&mut self, intent: Intent<S, C>, ids: &dyn IdentityGenerator) -> Outcome {
        let current = std::mem::replace(self, Self::Idle);
        let (next, outcome) = current.transition(intent, ids);
        *self = next;
        outcome
    }

    /// Consumes the state and returns its successor under `intent`.
    pub fn transition(self, intent: Intent<S, C>, ids: &dyn IdentityGenerator) -> (Self, Outcome) {
        match (self, intent) {
            (Self::Idle, Intent::CreateRoom { display_name }) => {
                let membership = Membership {
                    local_id: ids.generate(),
                    display_name,
                    role: Role::Host,
                };
                (Self::Initializing(membership), Outcome::Entered)
            }
            (
                Self::Idle,
                Intent::JoinRoom {
                    display_name,
                    remote_id,
                },
            ) => {
                let membership = Membership {
                    local_id: ids.generate(),
                    display_name,
                    role: Role::Guest { remote_id },
                };
                (Self::Initializing(membership), Outcome::Entered)
            }

            (Self::Initializing(membership), Intent::MediaAcquired { stream }) => {
                let ready = ReadySession {
                    membership,
                    local_stream: stream,
                    roster: Roster::new(),
                };
                (Self::Ready(ready), Outcome::Entered)
            }
            (Self::Initializing(_), Intent::ConnectionFailed { .. }) => {
                (Self::Idle, Outcome::Entered)
            }

            (Self::Ready(mut ready), Intent::PeerJoined { peer_id, channel }) => {
                ready.roster.insert(peer_id, channel);
                (Self::Ready(ready), Outcome::Updated)
            }
            (Self::Ready(mut ready), Intent::PeerLeft { peer_id }) => {
                // Leaving twice must not look like a change.
                let outcome = match ready.roster.remove(&peer_id) {
                    Some(_) => Outcome::Updated,
                    None => Outcome::Ignored,
                };
                (Self::Ready(ready), outcome)
            }
            (Self::Ready(_), Intent::LeaveRoom | Intent::ConnectionFailed { .. }) => {
                (Self::Idle, Outcome::Entered)
            }

            (state, _) => (state, Outcome::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use meshroom_fabric::FabricError;

    use super::*;
    use crate::Stage;

    type TestSession = Session<String, u32>;
    type TestIntent = Intent<String, u32>;

    fn counter_ids() -> impl IdentityGenerator {
        let next = AtomicU64::new(1);
        move || PeerId::new(format!("id-{}", next.fetch_add(1, Ordering::Relaxed)))
    }

    fn pid(id: &str) -> PeerId {
        PeerId::from(id)
    }

    fn failure() -> ConnectionError {
        ConnectionError::endpoint(Stage::Opening, FabricError::Signaling("down".into()))
    }

    fn create(name: &str) -> TestIntent {
        Intent::CreateRoom {
            display_name: name.into(),
        }
    }

    fn join(name: &str, remote: &str) -> TestIntent {
        Intent::JoinRoom {
            display_name: name.into(),
            remote_id: pid(remote),
        }
    }

    fn ready_host(ids: &dyn IdentityGenerator) -> TestSession {
        let mut session = TestSession::Idle;
        session.apply(create("alice"), ids);
        session.apply(
            Intent::MediaAcquired {
                stream: "mic".into(),
            },
            ids,
        );
        session
    }

    /// One of each intent, built fresh because intents are not `Clone`.
    fn every_intent() -> Vec<TestIntent> {
        vec![
            create("x"),
            join("x", "host"),
            Intent::LeaveRoom,
            Intent::MediaAcquired {
                stream: "mic".into(),
            },
            Intent::ConnectionFailed { error: failure() },
            Intent::PeerJoined {
                peer_id: pid("p"),
                channel: 7,
            },
            Intent::PeerLeft { peer_id: pid("p") },
        ]
    }

    fn in_table(kind: SessionKind, intent: &TestIntent) -> bool {
        match kind {
            SessionKind::Idle => intent.starts_attempt(),
            SessionKind::Initializing => matches!(
                intent,
                Intent::MediaAcquired { .. } | Intent::ConnectionFailed { .. }
            ),
            SessionKind::Ready => matches!(
                intent,
                Intent::PeerJoined { .. }
                    | Intent::PeerLeft { .. }
                    | Intent::LeaveRoom
                    | Intent::ConnectionFailed { .. }
            ),
        }
    }

    // =========================================================================
    // Table rows
    // =========================================================================

    #[test]
    fn test_create_room_enters_initializing_as_host() {
        let ids = counter_ids();
        let mut session = TestSession::Idle;

        let outcome = session.apply(create("alice"), &ids);

        assert_eq!(outcome, Outcome::Entered);
        let membership = session.membership().expect("membership");
        assert_eq!(membership.display_name(), "alice");
        assert_eq!(membership.local_id(), &pid("id-1"));
        assert!(membership.is_host());
        assert_eq!(membership.remote_id(), None);
    }

    #[test]
    fn test_join_room_enters_initializing_as_guest() {
        let ids = counter_ids();
        let mut session = TestSession::Idle;

        session.apply(join("bob", "host-1"), &ids);

        let membership = session.membership().expect("membership");
        assert_eq!(membership.display_name(), "bob");
        assert_eq!(
            membership.role(),
            &Role::Guest {
                remote_id: pid("host-1")
            }
        );
    }

    #[test]
    fn test_media_acquired_preserves_membership() {
        let ids = counter_ids();
        let mut session = TestSession::Idle;
        session.apply(join("bob", "host-1"), &ids);
        let before = session.membership().cloned().expect("membership");

        let outcome = session.apply(
            Intent::MediaAcquired {
                stream: "mic".into(),
            },
            &ids,
        );

        assert_eq!(outcome, Outcome::Entered);
        let ready = session.as_ready().expect("ready");
        assert_eq!(ready.membership(), &before);
        assert_eq!(ready.membership().remote_id(), Some(&pid("host-1")));
        assert_eq!(ready.local_stream(), "mic");
        assert!(ready.roster().is_empty());
    }

    #[test]
    fn test_connection_failed_while_initializing_returns_to_idle() {
        let ids = counter_ids();
        let mut session = TestSession::Idle;
        session.apply(create("alice"), &ids);

        let outcome = session.apply(Intent::ConnectionFailed { error: failure() }, &ids);

        assert_eq!(outcome, Outcome::Entered);
        assert!(session.is_idle());
    }

    #[test]
    fn test_peer_joined_then_left_updates_roster() {
        let ids = counter_ids();
        let mut session = ready_host(&ids);

        let joined = session.apply(
            Intent::PeerJoined {
                peer_id: pid("g1"),
                channel: 1,
            },
            &ids,
        );
        assert_eq!(joined, Outcome::Updated);
        assert_eq!(session.roster().map(Roster::len), Some(1));

        let left = session.apply(Intent::PeerLeft { peer_id: pid("g1") }, &ids);
        assert_eq!(left, Outcome::Updated);
        assert_eq!(session.roster().map(Roster::len), Some(0));
    }

    #[test]
    fn test_peer_joined_twice_keeps_one_entry_with_latest_channel() {
        let ids = counter_ids();
        let mut session = ready_host(&ids);

        for channel in [1, 2] {
            session.apply(
                Intent::PeerJoined {
                    peer_id: pid("g1"),
                    channel,
                },
                &ids,
            );
        }

        let roster = session.roster().expect("roster");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get(&pid("g1")), Some(&2));
    }

    #[test]
    fn test_peer_left_for_absent_peer_is_ignored() {
        let ids = counter_ids();
        let mut session = ready_host(&ids);
        let before = session.clone();

        let outcome = session.apply(
            Intent::PeerLeft {
                peer_id: pid("nobody"),
            },
            &ids,
        );

        assert_eq!(outcome, Outcome::Ignored);
        assert_eq!(session, before);
    }

    #[test]
    fn test_leave_room_from_ready_is_terminal() {
        let ids = counter_ids();
        let mut session = ready_host(&ids);
        session.apply(
            Intent::PeerJoined {
                peer_id: pid("g1"),
                channel: 1,
            },
            &ids,
        );

        session.apply(Intent::LeaveRoom, &ids);

        assert!(session.is_idle());
        assert!(session.roster().is_none());
    }

    // =========================================================================
    // Laws
    // =========================================================================

    #[test]
    fn test_pairs_outside_the_table_are_noops() {
        let ids = counter_ids();
        let initializing = {
            let mut s = TestSession::Idle;
            s.apply(create("alice"), &ids);
            s
        };
        let ready = {
            let mut s = ready_host(&ids);
            s.apply(
                Intent::PeerJoined {
                    peer_id: pid("p"),
                    channel: 7,
                },
                &ids,
            );
            s
        };

        for state in [TestSession::Idle, initializing, ready] {
            for intent in every_intent() {
                if in_table(state.kind(), &intent) {
                    continue;
                }
                let name = intent.name();
                let mut after = state.clone();

                let outcome = after.apply(intent, &ids);

                assert_eq!(outcome, Outcome::Ignored, "{} + {name}", state.kind());
                assert_eq!(after, state, "{} + {name} must not change state", state.kind());
            }
        }
    }

    #[test]
    fn test_each_new_session_gets_a_fresh_id() {
        let ids = counter_ids();
        let mut session = TestSession::Idle;

        session.apply(create("alice"), &ids);
        let first = session.membership().map(|m| m.local_id().clone());
        session.apply(Intent::ConnectionFailed { error: failure() }, &ids);
        session.apply(join("alice", "host"), &ids);
        let second = session.membership().map(|m| m.local_id().clone());

        assert_ne!(first, second);
    }

    #[test]
    fn test_idle_after_leave_does_not_remember_old_session() {
        let ids = counter_ids();
        let mut session = ready_host(&ids);
        session.apply(Intent::LeaveRoom, &ids);

        session.apply(create("carol"), &ids);

        let membership = session.membership().expect("membership");
        assert_eq!(membership.display_name(), "carol");
        assert_eq!(membership.local_id(), &pid("id-2"));
    }

    #[test]
    fn test_fold_calls_exactly_the_matching_handler() {
        let ids = counter_ids();
        let idle = TestSession::Idle;
        let mut initializing = TestSession::Idle;
        initializing.apply(create("alice"), &ids);
        let ready = ready_host(&ids);

        let label = |s: &TestSession| {
            s.fold(
                || "idle".to_string(),
                |m| format!("initializing {}", m.display_name()),
                |r| format!("ready {}", r.roster().len()),
            )
        };

        assert_eq!(label(&idle), "idle");
        assert_eq!(label(&initializing), "initializing alice");
        assert_eq!(label(&ready), "ready 0");
    }

    #[test]
    fn test_room_command_converts_to_intent() {
        let intent: TestIntent = RoomCommand::JoinRoom {
            display_name: "bob".into(),
            remote_id: pid("h"),
        }
        .into();

        assert!(intent.starts_attempt());
        assert_eq!(intent.name(), "join_room");
    }
}
