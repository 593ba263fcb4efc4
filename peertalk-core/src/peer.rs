//! Peer registry: identity, lifecycle state, and discovery bookkeeping.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::caps::{Capabilities, Negotiated};
use crate::transport::Tick;

/// Stable handle for a peer. Assigned from a monotonic counter and never
/// reused for the lifetime of the engine, so a stale id held by the host
/// can never alias a different peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u16);

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Lifecycle of a peer relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Known from beacons only.
    Discovered,
    /// Stream open requested, waiting for the transport.
    Connecting,
    /// Stream open, capability exchange in flight.
    Handshaking,
    /// Fully established; messages may flow.
    Connected,
    /// Orderly shutdown in progress.
    Closing,
    /// Terminal until the peer beacons again.
    Closed,
}

impl PeerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerState::Discovered => "discovered",
            PeerState::Connecting => "connecting",
            PeerState::Handshaking => "handshaking",
            PeerState::Connected => "connected",
            PeerState::Closing => "closing",
            PeerState::Closed => "closed",
        }
    }

    /// Legal transitions. Any state may move to `Closing` or `Closed`
    /// (aborts); forward progress is strictly ordered.
    fn allows(self, to: PeerState) -> bool {
        use PeerState::*;
        matches!(
            (self, to),
            (Discovered, Connecting)
                | (Connecting, Handshaking)
                | (Handshaking, Connected)
                | (Closed, Discovered)
                | (_, Closing)
                | (_, Closed)
        )
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the registry tracks about one peer.
#[derive(Debug)]
pub struct PeerRecord {
    pub id: PeerId,
    pub name: String,
    pub address: u32,
    /// Stream port the peer advertised.
    pub listen_port: u16,
    /// Beacon instance number; changes when the peer restarts.
    pub instance: u32,
    pub state: PeerState,
    pub discovered_at: Tick,
    pub last_seen: Tick,
    /// Remote limits from the handshake, once received.
    pub remote_caps: Option<Capabilities>,
    /// Agreed contract, once negotiated.
    pub negotiated: Option<Negotiated>,
}

impl PeerRecord {
    /// Whether the peer is in an active connection attempt or session.
    /// Busy peers are exempt from discovery eviction.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            PeerState::Connecting
                | PeerState::Handshaking
                | PeerState::Connected
                | PeerState::Closing
        )
    }
}

/// Outcome of feeding a beacon into the registry.
#[derive(Debug, PartialEq, Eq)]
pub enum Ingest {
    /// New peer (or a restarted one under a fresh instance number).
    Created(PeerId),
    /// Known peer refreshed; includes a closed peer reverting to
    /// discovered.
    Refreshed(PeerId),
    /// Known peer that was closed and is now discoverable again.
    Recovered(PeerId),
    /// Registry at capacity; beacon dropped.
    Full,
}

/// Bounded peer table keyed by id, deduplicated by (address, instance).
pub struct Registry {
    peers: HashMap<PeerId, PeerRecord>,
    next_id: u16,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Registry {
            peers: HashMap::with_capacity(capacity),
            next_id: 1,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerRecord> {
        self.peers.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: PeerId) -> Option<&mut PeerRecord> {
        self.peers.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    pub fn find_by_endpoint(&self, address: u32, instance: u32) -> Option<PeerId> {
        self.peers
            .values()
            .find(|p| p.address == address && p.instance == instance)
            .map(|p| p.id)
    }

    pub fn find_by_address(&self, address: u32) -> Option<PeerId> {
        self.peers
            .values()
            .find(|p| p.address == address)
            .map(|p| p.id)
    }

    /// Record a beacon sighting. Known (address, instance) pairs refresh
    /// `last_seen`; a known address under a new instance number replaces
    /// the old record (the peer restarted); otherwise a new peer is
    /// created, unless the table is full.
    pub fn ingest(
        &mut self,
        address: u32,
        instance: u32,
        name: &str,
        listen_port: u16,
        now: Tick,
    ) -> Ingest {
        if let Some(id) = self.find_by_endpoint(address, instance) {
            let peer = self.peers.get_mut(&id).unwrap_or_else(|| unreachable!());
            peer.last_seen = now;
            peer.listen_port = listen_port;
            if peer.state == PeerState::Closed {
                peer.state = PeerState::Discovered;
                debug!(peer = %id, "closed peer beaconed, rediscovered");
                return Ingest::Recovered(id);
            }
            return Ingest::Refreshed(id);
        }

        // Same address, different instance: the old record is stale.
        if let Some(stale) = self.find_by_address(address) {
            if !self.peers.get(&stale).map(|p| p.is_busy()).unwrap_or(false) {
                debug!(peer = %stale, "replacing restarted peer");
                self.peers.remove(&stale);
            }
        }

        if self.peers.len() >= self.capacity {
            warn!(capacity = self.capacity, "peer table full, beacon dropped");
            return Ingest::Full;
        }
        let Some(id) = self.allocate_id() else {
            warn!("peer id space exhausted, beacon dropped");
            return Ingest::Full;
        };
        self.peers.insert(
            id,
            PeerRecord {
                id,
                name: name.to_string(),
                address,
                listen_port,
                instance,
                state: PeerState::Discovered,
                discovered_at: now,
                last_seen: now,
                remote_caps: None,
                negotiated: None,
            },
        );
        debug!(peer = %id, name, address, "peer discovered");
        Ingest::Created(id)
    }

    /// Register a peer we first learn about from an inbound connection
    /// rather than a beacon.
    pub fn ingest_inbound(&mut self, address: u32, now: Tick) -> Option<PeerId> {
        if let Some(id) = self.find_by_address(address) {
            return Some(id);
        }
        if self.peers.len() >= self.capacity {
            return None;
        }
        let id = self.allocate_id()?;
        self.peers.insert(
            id,
            PeerRecord {
                id,
                name: String::new(),
                address,
                listen_port: 0,
                instance: 0,
                state: PeerState::Discovered,
                discovered_at: now,
                last_seen: now,
                remote_caps: None,
                negotiated: None,
            },
        );
        Some(id)
    }

    fn allocate_id(&mut self) -> Option<PeerId> {
        if self.next_id == u16::MAX {
            return None;
        }
        let id = PeerId(self.next_id);
        self.next_id += 1;
        Some(id)
    }

    /// Validated state transition. Setting the current state again is a
    /// quiet no-op; illegal moves are refused and logged, leaving the
    /// current state untouched.
    pub(crate) fn set_state(&mut self, id: PeerId, to: PeerState) -> bool {
        let Some(peer) = self.peers.get_mut(&id) else {
            return false;
        };
        if peer.state == to {
            return true;
        }
        if !peer.state.allows(to) {
            warn!(peer = %id, from = %peer.state, to = %to, "refused state transition");
            return false;
        }
        debug!(peer = %id, from = %peer.state, to = %to, "peer state");
        peer.state = to;
        true
    }

    pub(crate) fn touch(&mut self, id: PeerId, now: Tick) {
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_seen = now;
        }
    }

    pub(crate) fn remove(&mut self, id: PeerId) -> Option<PeerRecord> {
        self.peers.remove(&id)
    }

    /// Evict peers silent for longer than `timeout` ticks. Peers with a
    /// live or pending connection are exempt; stream liveness is governed
    /// by the transport, not by beacon cadence.
    pub(crate) fn sweep(&mut self, now: Tick, timeout: Tick) -> Vec<PeerId> {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| !p.is_busy() && now.saturating_sub(p.last_seen) > timeout)
            .map(|p| p.id)
            .collect();
        for id in &stale {
            debug!(peer = %id, "peer timed out");
            self.peers.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(4)
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut reg = registry();
        let Ingest::Created(a) = reg.ingest(1, 10, "a", 7354, 0) else {
            panic!()
        };
        let Ingest::Created(b) = reg.ingest(2, 20, "b", 7354, 0) else {
            panic!()
        };
        assert_eq!(a, PeerId(1));
        assert_eq!(b, PeerId(2));
        reg.remove(a);
        let Ingest::Created(c) = reg.ingest(3, 30, "c", 7354, 0) else {
            panic!()
        };
        assert_eq!(c, PeerId(3));
    }

    #[test]
    fn repeated_beacons_refresh_not_duplicate() {
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 10, "a", 7354, 0) else {
            panic!()
        };
        assert_eq!(reg.ingest(1, 10, "a", 7354, 5), Ingest::Refreshed(id));
        assert_eq!(reg.ingest(1, 10, "a", 7354, 9), Ingest::Refreshed(id));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(id).unwrap().last_seen, 9);
    }

    #[test]
    fn restarted_peer_gets_a_fresh_id() {
        let mut reg = registry();
        let Ingest::Created(old) = reg.ingest(1, 10, "a", 7354, 0) else {
            panic!()
        };
        let Ingest::Created(new) = reg.ingest(1, 11, "a", 7354, 1) else {
            panic!("restart should create")
        };
        assert_ne!(old, new);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(old).is_none());
    }

    #[test]
    fn table_capacity_bounds_creation() {
        let mut reg = registry();
        for n in 0..4 {
            assert!(matches!(reg.ingest(n, 1, "p", 1, 0), Ingest::Created(_)));
        }
        assert_eq!(reg.ingest(99, 1, "p", 1, 0), Ingest::Full);
        assert_eq!(reg.len(), 4);
    }

    #[test]
    fn forward_transitions_allowed_in_order() {
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 1, "a", 1, 0) else {
            panic!()
        };
        assert!(reg.set_state(id, PeerState::Connecting));
        assert!(reg.set_state(id, PeerState::Handshaking));
        assert!(reg.set_state(id, PeerState::Connected));
        assert!(reg.set_state(id, PeerState::Closing));
        assert!(reg.set_state(id, PeerState::Closed));
    }

    #[test]
    fn skipping_states_refused() {
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 1, "a", 1, 0) else {
            panic!()
        };
        assert!(!reg.set_state(id, PeerState::Connected));
        assert_eq!(reg.get(id).unwrap().state, PeerState::Discovered);
        assert!(reg.set_state(id, PeerState::Connecting));
        assert!(!reg.set_state(id, PeerState::Connected));
    }

    #[test]
    fn repeating_the_current_state_is_a_quiet_no_op() {
        // An orderly disconnect marks the peer closing before the close
        // completes; the completion must not be refused as an illegal
        // closing-to-closing move.
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 1, "a", 1, 0) else {
            panic!()
        };
        reg.set_state(id, PeerState::Connecting);
        assert!(reg.set_state(id, PeerState::Closing));
        assert!(reg.set_state(id, PeerState::Closing));
        assert_eq!(reg.get(id).unwrap().state, PeerState::Closing);
        assert!(reg.set_state(id, PeerState::Closed));
    }

    #[test]
    fn any_state_may_abort_to_closed() {
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 1, "a", 1, 0) else {
            panic!()
        };
        reg.set_state(id, PeerState::Connecting);
        assert!(reg.set_state(id, PeerState::Closed));
    }

    #[test]
    fn closed_peer_recovers_on_beacon() {
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 10, "a", 1, 0) else {
            panic!()
        };
        reg.set_state(id, PeerState::Closed);
        assert_eq!(reg.ingest(1, 10, "a", 1, 50), Ingest::Recovered(id));
        assert_eq!(reg.get(id).unwrap().state, PeerState::Discovered);
    }

    #[test]
    fn sweep_evicts_only_silent_idle_peers() {
        let mut reg = registry();
        let Ingest::Created(idle) = reg.ingest(1, 1, "idle", 1, 0) else {
            panic!()
        };
        let Ingest::Created(busy) = reg.ingest(2, 2, "busy", 1, 0) else {
            panic!()
        };
        reg.set_state(busy, PeerState::Connecting);
        reg.set_state(busy, PeerState::Handshaking);
        reg.set_state(busy, PeerState::Connected);

        // Silence threshold of 5 ticks: at exactly 5 elapsed, still alive.
        assert!(reg.sweep(5, 5).is_empty());
        let evicted = reg.sweep(6, 5);
        assert_eq!(evicted, vec![idle]);
        assert!(reg.get(idle).is_none());
        assert!(reg.get(busy).is_some());
    }

    #[test]
    fn beacon_resets_the_silence_clock() {
        let mut reg = registry();
        let Ingest::Created(id) = reg.ingest(1, 1, "a", 1, 0) else {
            panic!()
        };
        assert_eq!(reg.ingest(1, 1, "a", 1, 4), Ingest::Refreshed(id));
        assert!(reg.sweep(6, 5).is_empty());
        assert_eq!(reg.sweep(10, 5), vec![id]);
    }
}
