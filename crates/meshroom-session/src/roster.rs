//! The roster: which peers are connected right now.

use std::collections::HashMap;
use std::collections::hash_map;

use meshroom_protocol::PeerId;

/// Map of connected peer id → live channel handle.
///
/// Lives inside the `Ready` state and is born empty with it. Only the
/// mesh orchestrator's join/leave intents mutate it; everyone else reads
/// it through a snapshot.
///
/// `insert` is an upsert and `remove` is idempotent, so replaying a join
/// or a leave never produces duplicates or errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster<C> {
    peers: HashMap<PeerId, C>,
}

impl<C> Roster<C> {
    /// Creates an empty roster.
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
        }
    }

    /// Adds `peer_id`, replacing any previous channel for it.
    ///
    /// Returns the replaced channel, if there was one.
    pub fn insert(&mut self, peer_id: PeerId, channel: C) -> Option<C> {
        self.peers.insert(peer_id, channel)
    }

    /// Removes `peer_id`. Removing an absent peer is a no-op.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<C> {
        self.peers.remove(peer_id)
    }

    /// The channel of `peer_id`, if connected.
    pub fn get(&self, peer_id: &PeerId) -> Option<&C> {
        self.peers.get(peer_id)
    }

    /// Whether `peer_id` is connected.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns `true` if nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Connected peer ids in sorted order (stable for rendering).
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Iterates over (peer id, channel) pairs in arbitrary order.
    pub fn iter(&self) -> hash_map::Iter<'_, PeerId, C> {
        self.peers.iter()
    }
}

impl<C> Default for Roster<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(id: &str) -> PeerId {
        PeerId::from(id)
    }

    #[test]
    fn test_insert_then_get() {
        let mut roster = Roster::new();
        assert!(roster.insert(pid("a"), 1).is_none());

        assert_eq!(roster.get(&pid("a")), Some(&1));
        assert!(roster.contains(&pid("a")));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_insert_same_peer_overwrites() {
        let mut roster = Roster::new();
        roster.insert(pid("a"), 1);

        let replaced = roster.insert(pid("a"), 2);

        assert_eq!(replaced, Some(1));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get(&pid("a")), Some(&2));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut roster = Roster::new();
        roster.insert(pid("a"), 1);

        assert_eq!(roster.remove(&pid("a")), Some(1));
        assert_eq!(roster.remove(&pid("a")), None);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_peer_ids_are_sorted() {
        let mut roster = Roster::new();
        roster.insert(pid("c"), ());
        roster.insert(pid("a"), ());
        roster.insert(pid("b"), ());

        assert_eq!(roster.peer_ids(), vec![pid("a"), pid("b"), pid("c")]);
        assert_eq!(roster.iter().count(), 3);
    }
}
