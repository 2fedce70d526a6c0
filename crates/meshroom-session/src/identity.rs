//! Identity generation for new sessions.
//!
//! Creating or joining a room registers a brand-new endpoint with the
//! fabric, and that endpoint needs an id nobody else uses. The host's id
//! is also the room code guests type in.
//!
//! The machine asks an [`IdentityGenerator`] for each new id. Production
//! code uses [`RandomIdentity`]; tests plug in a closure that hands out
//! predictable ids.

use meshroom_protocol::PeerId;
use uuid::Uuid;

/// Produces a fresh endpoint id for every new session.
///
/// Implementations must never return the same id twice within a process.
///
/// Any `Fn() -> PeerId` closure is a generator:
///
/// ```rust
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use meshroom_protocol::PeerId;
/// use meshroom_session::IdentityGenerator;
///
/// let next = AtomicU64::new(1);
/// let ids = move || PeerId::new(format!("peer-{}", next.fetch_add(1, Ordering::Relaxed)));
/// assert_eq!(ids.generate(), PeerId::from("peer-1"));
/// ```
pub trait IdentityGenerator: Send + Sync + 'static {
    /// Returns a new, unused id.
    fn generate(&self) -> PeerId;
}

impl<F> IdentityGenerator for F
where
    F: Fn() -> PeerId + Send + Sync + 'static,
{
    fn generate(&self) -> PeerId {
        self()
    }
}

/// Random version-4 UUIDs, e.g. `"3b241101-e2bb-4255-8caf-4136c566a962"`.
///
/// 122 random bits per id make a collision within one process
/// practically impossible.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentity;

impl IdentityGenerator for RandomIdentity {
    fn generate(&self) -> PeerId {
        PeerId::new(Uuid::new_v4().to_string())
    }
}
