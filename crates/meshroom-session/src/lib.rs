//! Peer session state machine for Meshroom.
//!
//! This crate owns the single authoritative session of a participant:
//!
//! 1. **Transitions**: a pure function from (state, intent) to the next
//!    state ([`Session::apply`])
//! 2. **The machine**: the shared, observable holder of that state
//!    ([`SessionMachine`]), tagging every state instance with an
//!    [`Epoch`] so late side effects can be discarded
//! 3. **The roster**: the live peer-id → channel map ([`Roster`])
//! 4. **Identity**: fresh endpoint ids for new sessions
//!    ([`IdentityGenerator`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Mesh orchestrator (above)  ← observes states, feeds back intents
//!     ↕
//! Session layer (this crate) ← pure transitions, snapshots, epochs
//!     ↕
//! Protocol / fabric (below)  ← PeerId, FabricError
//! ```

mod error;
mod identity;
mod machine;
mod roster;
mod session;

pub use error::{ConnectionError, Stage};
pub use identity::{IdentityGenerator, RandomIdentity};
pub use machine::{Epoch, SessionMachine, Snapshot};
pub use roster::Roster;
pub use session::{
    Intent, Membership, Outcome, ReadySession, Role, RoomCommand, Session, SessionKind,
};
