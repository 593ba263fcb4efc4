//! The protocol engine: discovery, connection management, and the poll
//! loop that drives everything.
//!
//! The engine performs no I/O of its own and never blocks. The host calls
//! [`Engine::poll`] from its main loop; each call pumps the transport,
//! drains pending completion flags, advances timers, and returns the
//! events that occurred, in the order they were observed. All engine
//! methods are main-context only.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, error, info, warn};

use crate::caps::{self, Capabilities, Negotiated};
use crate::config::Config;
use crate::error::{DisconnectReason, Error};
use crate::frag::{self, Reassembly};
use crate::notify::{self, Drain, TransportEvent};
use crate::peer::{Ingest, PeerId, PeerRecord, PeerState, Registry};
use crate::transport::{ConnId, Tick, Transport, BROADCAST_ADDR};
use crate::wire::{self, Beacon, BeaconKind, Message, WireError, PROTOCOL_VERSION};

/// Completion flags the handoff ring can hold between two polls.
pub const NOTIFY_CAPACITY: usize = 64;

const READ_CHUNK: usize = 4096;

/// What happened since the previous poll. Returned in observation order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new (or returning) peer is visible on the network.
    PeerDiscovered { peer: PeerId },
    /// A discovered peer went silent past the eviction threshold.
    PeerLost { peer: PeerId },
    /// Capability negotiation completed; messages may flow.
    PeerConnected { peer: PeerId },
    /// The connection ended. Reported exactly once per connection.
    PeerDisconnected {
        peer: PeerId,
        reason: DisconnectReason,
    },
    /// A complete application message arrived.
    Message { peer: PeerId, data: Vec<u8> },
}

/// Running counters, monotonic for the engine's lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub beacons_sent: u64,
    pub beacons_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub peers_discovered: u64,
    pub peers_evicted: u64,
    pub protocol_violations: u64,
    /// Times the notification ring overflowed and dropped flags.
    pub notify_overflows: u64,
}

/// Per-connection bookkeeping. One outstanding stream send at a time; the
/// rest queue here until the transport reports completion.
struct Link {
    conn: ConnId,
    opened_at: Tick,
    inbound: Vec<u8>,
    outbound: VecDeque<Vec<u8>>,
    in_flight: bool,
    reassembly: Option<Reassembly>,
    remote_pressure: u8,
    last_reported_pressure: u8,
}

impl Link {
    fn new(conn: ConnId, opened_at: Tick) -> Self {
        Link {
            conn,
            opened_at,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            in_flight: false,
            reassembly: None,
            remote_pressure: 0,
            last_reported_pressure: 0,
        }
    }
}

pub struct Engine<T: Transport> {
    config: Config,
    transport: T,
    drain: Drain,
    registry: Registry,
    links: HashMap<PeerId, Link>,
    conn_to_peer: HashMap<ConnId, PeerId>,
    /// Our beacon instance number; lets us ignore our own broadcast echo.
    instance: u32,
    local_pressure: u8,
    discovery_active: bool,
    last_announce: Tick,
    now: Tick,
    /// Host-requested closes, honored at the top of the next poll.
    pending_closes: Vec<(PeerId, DisconnectReason)>,
    shut_down: bool,
    stats: Stats,
}

impl<T: Transport> Engine<T> {
    /// Set up the engine over a transport backend. The only fatal error:
    /// if the backend cannot initialize there is nothing to run.
    pub fn new(config: &Config, mut transport: T) -> Result<Self, Error> {
        let config = config.resolve();
        if config.local_name.len() > wire::MAX_PEER_NAME {
            return Err(Error::Wire(WireError::NameTooLong));
        }
        let (notifier, drain) = notify::ring(NOTIFY_CAPACITY);
        transport.init(notifier)?;
        let now = transport.get_ticks();
        // Knuth-mixed startup ticks; only has to differ between two
        // processes racing to start on the same host.
        let instance = ((now as u32) ^ ((now >> 32) as u32)).wrapping_mul(2_654_435_761) | 1;
        info!(name = %config.local_name, instance, "engine up");
        Ok(Engine {
            registry: Registry::new(config.max_peers as usize),
            config,
            transport,
            drain,
            links: HashMap::new(),
            conn_to_peer: HashMap::new(),
            instance,
            local_pressure: 0,
            discovery_active: false,
            last_announce: 0,
            now,
            pending_closes: Vec::new(),
            shut_down: false,
            stats: Stats::default(),
        })
    }

    /// Effective configuration after defaults were applied.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn peer(&self, id: PeerId) -> Option<&PeerRecord> {
        self.registry.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerRecord> {
        self.registry.iter()
    }

    /// The agreed contract for a connected peer.
    pub fn negotiated(&self, id: PeerId) -> Option<Negotiated> {
        self.registry.get(id).and_then(|p| p.negotiated)
    }

    /// Diagnostic hint: whether messages to this peer can ever span more
    /// than one frame. Individual messages still fragment only when they
    /// exceed the negotiated chunk.
    pub fn fragmentation_capable(&self, id: PeerId) -> bool {
        self.config.enable_fragmentation
            && self
                .negotiated(id)
                .map(|n| n.effective_chunk < n.effective_max)
                .unwrap_or(false)
    }

    /// Begin broadcasting presence and listening for beacons. The first
    /// announce goes out immediately, then every `discovery_interval`
    /// ticks from within `poll`.
    pub fn start_discovery(&mut self) -> Result<(), Error> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        if self.discovery_active {
            return Ok(());
        }
        self.discovery_active = true;
        self.now = self.transport.get_ticks();
        self.send_beacon(BeaconKind::Announce);
        self.last_announce = self.now;
        info!(port = self.config.discovery_port, "discovery started");
        Ok(())
    }

    /// Stop announcing. Sends a goodbye so listeners can evict us without
    /// waiting out the silence threshold.
    pub fn stop_discovery(&mut self) {
        if !self.discovery_active {
            return;
        }
        self.send_beacon(BeaconKind::Goodbye);
        self.discovery_active = false;
        info!("discovery stopped");
    }

    /// Open a connection to a discovered peer. Idempotent: calling again
    /// while an attempt or session is in progress is a no-op.
    pub fn connect(&mut self, id: PeerId) -> Result<(), Error> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        let peer = self.registry.get(id).ok_or(Error::UnknownPeer(id))?;
        match peer.state {
            PeerState::Connecting | PeerState::Handshaking | PeerState::Connected => {
                return Ok(())
            }
            PeerState::Closing | PeerState::Closed => {
                return Err(Error::NotConnectable {
                    peer: id,
                    state: peer.state.as_str(),
                })
            }
            PeerState::Discovered => {}
        }
        let (addr, port) = (peer.address, peer.listen_port);
        let conn = self.transport.open(addr, port)?;
        self.registry.set_state(id, PeerState::Connecting);
        let opened_at = self.transport.get_ticks();
        self.links.insert(id, Link::new(conn, opened_at));
        self.conn_to_peer.insert(conn, id);
        debug!(peer = %id, %conn, "connecting");
        Ok(())
    }

    /// Request an orderly disconnect. A goodbye frame is queued and the
    /// close itself is honored on the next poll.
    pub fn disconnect(&mut self, id: PeerId) -> Result<(), Error> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        let peer = self.registry.get(id).ok_or(Error::UnknownPeer(id))?;
        if !self.links.contains_key(&id) {
            return Err(Error::NotConnected {
                peer: id,
                state: peer.state.as_str(),
            });
        }
        self.registry.set_state(id, PeerState::Closing);
        if let Ok(bytes) = wire::encode_frame(&Message::Bye) {
            self.queue_frame(id, bytes);
        }
        self.pending_closes.push((id, DisconnectReason::LocalRequest));
        Ok(())
    }

    /// Send an application message to a connected peer. The message is
    /// fragmented to the negotiated chunk size (shrunk further while the
    /// peer reports high pressure) and queued; delivery proceeds across
    /// subsequent polls.
    pub fn send(&mut self, id: PeerId, data: &[u8]) -> Result<(), Error> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        let peer = self.registry.get(id).ok_or(Error::UnknownPeer(id))?;
        if peer.state != PeerState::Connected {
            return Err(Error::NotConnected {
                peer: id,
                state: peer.state.as_str(),
            });
        }
        let negotiated = peer.negotiated.ok_or(Error::NotConnected {
            peer: id,
            state: peer.state.as_str(),
        })?;
        if data.len() as u64 > negotiated.effective_max as u64 {
            return Err(Error::MessageTooLarge {
                len: data.len(),
                max: negotiated.effective_max,
            });
        }
        let remote_pressure = self
            .links
            .get(&id)
            .map(|l| l.remote_pressure)
            .unwrap_or(0);
        let chunk = if self.config.enable_fragmentation {
            negotiated.chunk_under_pressure(remote_pressure)
        } else {
            negotiated.effective_max.max(1)
        };
        for frame in frag::fragment(data, chunk) {
            let bytes = wire::encode_frame(&Message::Data {
                total_length: frame.total_length,
                offset: frame.offset,
                flags: frame.flags,
                payload: frame.payload,
            })?;
            if let Some(link) = self.links.get_mut(&id) {
                link.outbound.push_back(bytes);
            }
        }
        self.stats.messages_sent += 1;
        self.kick(id);
        Ok(())
    }

    /// Update our advertised receive-buffer pressure (0..=100). Connected
    /// peers are told when the level moves far enough to matter.
    pub fn set_local_pressure(&mut self, level: u8) {
        let level = level.min(100);
        self.local_pressure = level;
        let due: Vec<PeerId> = self
            .links
            .iter()
            .filter(|(id, link)| {
                caps::pressure_report_due(link.last_reported_pressure, level)
                    && self
                        .registry
                        .get(**id)
                        .map(|p| p.state == PeerState::Connected)
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Ok(bytes) = wire::encode_frame(&Message::Pressure { level }) {
                self.queue_frame(id, bytes);
            }
            if let Some(link) = self.links.get_mut(&id) {
                link.last_reported_pressure = level;
            }
        }
    }

    /// One iteration of the engine. Pumps the transport, drains every
    /// completion flag raised since the previous call, advances discovery
    /// timers, and returns what happened.
    pub fn poll(&mut self) -> Vec<Event> {
        if self.shut_down {
            return Vec::new();
        }
        let mut events = Vec::new();

        for (id, reason) in std::mem::take(&mut self.pending_closes) {
            self.finish_close(id, reason, &mut events);
        }

        self.transport.poll();
        self.now = self.transport.get_ticks();

        // Bounded drain: anything the transport raises while we are
        // handling these is picked up next poll.
        let budget = self.drain.capacity() * 2;
        for _ in 0..budget {
            let Some(flag) = self.drain.pop() else { break };
            self.on_transport_event(flag, &mut events);
        }
        if self.drain.take_overflow() {
            self.stats.notify_overflows += 1;
            warn!("notification ring overflowed, completion flags were dropped");
        }

        self.run_timers(&mut events);
        events
    }

    /// Release every connection and the transport. Idempotent; after this
    /// all operations fail with [`Error::ShutDown`] and `poll` returns
    /// nothing, so late completions are discarded rather than dispatched.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        info!("engine shutting down");
        if self.discovery_active {
            self.stop_discovery();
        }
        let conns: Vec<ConnId> = self.links.values().map(|l| l.conn).collect();
        self.links.clear();
        self.conn_to_peer.clear();
        for conn in conns {
            self.transport.close(conn);
        }
        self.transport.shutdown();
        self.shut_down = true;
    }

    fn local_caps(&self) -> Capabilities {
        Capabilities {
            max_message_size: self.config.max_message_size,
            preferred_chunk: self.config.preferred_chunk,
            buffer_pressure: self.local_pressure,
        }
    }

    fn send_beacon(&mut self, kind: BeaconKind) {
        let beacon = Beacon {
            version: PROTOCOL_VERSION,
            kind,
            instance: self.instance,
            name: self.config.local_name.clone(),
            listen_port: self.config.listen_port,
        };
        match wire::encode_beacon(&beacon) {
            Ok(bytes) => {
                if let Err(e) =
                    self.transport
                        .send_udp(BROADCAST_ADDR, self.config.discovery_port, &bytes)
                {
                    warn!(error = %e, "beacon send failed");
                } else {
                    self.stats.beacons_sent += 1;
                }
            }
            Err(e) => error!(error = %e, "beacon encode failed"),
        }
    }

    fn on_transport_event(&mut self, flag: TransportEvent, events: &mut Vec<Event>) {
        match flag {
            TransportEvent::Datagram(d) => self.on_datagram(d.payload(), d.from_addr, events),
            TransportEvent::Opened { conn } => self.on_opened(conn),
            TransportEvent::Accepted { conn, addr, .. } => self.on_accepted(conn, addr),
            TransportEvent::Readable { conn } => self.on_readable(conn, events),
            TransportEvent::SendComplete { conn } => {
                if let Some(&id) = self.conn_to_peer.get(&conn) {
                    if let Some(link) = self.links.get_mut(&id) {
                        link.in_flight = false;
                    }
                    self.kick(id);
                }
            }
            TransportEvent::Closed { conn } => {
                if let Some(&id) = self.conn_to_peer.get(&conn) {
                    self.finish_close(id, DisconnectReason::RemoteClose, events);
                }
            }
            TransportEvent::Error { conn } => {
                if let Some(&id) = self.conn_to_peer.get(&conn) {
                    self.finish_close(id, DisconnectReason::TransportError, events);
                }
            }
        }
    }

    fn on_datagram(&mut self, payload: &[u8], from_addr: u32, events: &mut Vec<Event>) {
        let beacon = match wire::decode_beacon(payload) {
            Ok(b) => b,
            Err(e) => {
                debug!(from_addr, error = %e, "undecodable datagram dropped");
                return;
            }
        };
        if beacon.instance == self.instance {
            // Our own broadcast echoed back.
            return;
        }
        self.stats.beacons_received += 1;
        match beacon.kind {
            BeaconKind::Announce => {
                match self.registry.ingest(
                    from_addr,
                    beacon.instance,
                    &beacon.name,
                    beacon.listen_port,
                    self.now,
                ) {
                    Ingest::Created(id) | Ingest::Recovered(id) => {
                        self.stats.peers_discovered += 1;
                        events.push(Event::PeerDiscovered { peer: id });
                    }
                    Ingest::Refreshed(_) | Ingest::Full => {}
                }
            }
            BeaconKind::Goodbye => {
                if let Some(id) = self.registry.find_by_endpoint(from_addr, beacon.instance) {
                    let busy = self.registry.get(id).map(|p| p.is_busy()).unwrap_or(false);
                    if !busy {
                        self.registry.remove(id);
                        debug!(peer = %id, "peer said goodbye");
                        events.push(Event::PeerLost { peer: id });
                    }
                }
            }
        }
    }

    fn on_opened(&mut self, conn: ConnId) {
        let Some(&id) = self.conn_to_peer.get(&conn) else {
            self.transport.close(conn);
            return;
        };
        self.registry.set_state(id, PeerState::Handshaking);
        self.send_caps(id);
    }

    fn on_accepted(&mut self, conn: ConnId, addr: u32) {
        if !self.config.auto_accept {
            debug!(%conn, addr, "inbound connection refused, auto-accept off");
            self.transport.close(conn);
            return;
        }
        let Some(id) = self.registry.ingest_inbound(addr, self.now) else {
            warn!(addr, "inbound connection refused, peer table full");
            self.transport.close(conn);
            return;
        };
        let state = match self.registry.get(id) {
            Some(p) => p.state,
            None => return,
        };
        match state {
            PeerState::Closed => {
                self.registry.set_state(id, PeerState::Discovered);
            }
            PeerState::Discovered => {}
            // Already mid-attempt or connected; refuse the duplicate.
            _ => {
                debug!(peer = %id, %conn, "duplicate inbound connection refused");
                self.transport.close(conn);
                return;
            }
        }
        self.registry.set_state(id, PeerState::Connecting);
        self.registry.set_state(id, PeerState::Handshaking);
        self.links.insert(id, Link::new(conn, self.now));
        self.conn_to_peer.insert(conn, id);
        debug!(peer = %id, %conn, "inbound connection accepted");
        self.send_caps(id);
    }

    fn send_caps(&mut self, id: PeerId) {
        let local = self.local_caps();
        match wire::encode_frame(&Message::Capabilities {
            version: PROTOCOL_VERSION,
            max_message_size: local.max_message_size,
            preferred_chunk: local.preferred_chunk,
            buffer_pressure: local.buffer_pressure,
        }) {
            Ok(bytes) => self.queue_frame(id, bytes),
            Err(e) => error!(peer = %id, error = %e, "capability encode failed"),
        }
    }

    fn on_readable(&mut self, conn: ConnId, events: &mut Vec<Event>) {
        let Some(&id) = self.conn_to_peer.get(&conn) else {
            return;
        };
        let mut scratch = [0u8; READ_CHUNK];
        loop {
            let n = match self.transport.recv_stream(conn, &mut scratch) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(peer = %id, error = %e, "stream read failed");
                    self.finish_close(id, DisconnectReason::TransportError, events);
                    return;
                }
            };
            self.stats.bytes_received += n as u64;
            match self.links.get_mut(&id) {
                Some(link) => link.inbound.extend_from_slice(&scratch[..n]),
                None => return,
            }
        }
        loop {
            let Some(link) = self.links.get_mut(&id) else {
                return;
            };
            match wire::decode_frame(&link.inbound) {
                Ok((msg, used)) => {
                    link.inbound.drain(..used);
                    self.stats.frames_received += 1;
                    self.on_message(id, msg, events);
                }
                Err(WireError::NeedMore) => break,
                Err(e) => {
                    error!(peer = %id, error = %e, "undecodable frame");
                    self.abort_violation(id, events);
                    return;
                }
            }
        }
    }

    fn on_message(&mut self, id: PeerId, msg: Message, events: &mut Vec<Event>) {
        self.registry.touch(id, self.now);
        match msg {
            Message::Capabilities {
                version,
                max_message_size,
                preferred_chunk,
                buffer_pressure,
            } => {
                if version != PROTOCOL_VERSION {
                    error!(peer = %id, version, "capability version mismatch");
                    self.abort_violation(id, events);
                    return;
                }
                let state = match self.registry.get(id) {
                    Some(p) => p.state,
                    None => return,
                };
                match state {
                    PeerState::Handshaking => {
                        let remote = Capabilities {
                            max_message_size,
                            preferred_chunk,
                            buffer_pressure,
                        };
                        let negotiated = caps::negotiate(&self.local_caps(), &remote);
                        if let Some(peer) = self.registry.get_mut(id) {
                            peer.remote_caps = Some(remote);
                            peer.negotiated = Some(negotiated);
                        }
                        if let Some(link) = self.links.get_mut(&id) {
                            link.remote_pressure = buffer_pressure;
                        }
                        self.registry.set_state(id, PeerState::Connected);
                        info!(
                            peer = %id,
                            max = negotiated.effective_max,
                            chunk = negotiated.effective_chunk,
                            "peer connected"
                        );
                        events.push(Event::PeerConnected { peer: id });
                    }
                    PeerState::Connected => {
                        // Late advisory update; the contract itself is
                        // fixed for the connection's lifetime.
                        if let Some(link) = self.links.get_mut(&id) {
                            link.remote_pressure = buffer_pressure;
                        }
                    }
                    other => {
                        debug!(peer = %id, state = %other, "capabilities ignored");
                    }
                }
            }
            Message::Data {
                total_length,
                offset,
                flags,
                payload,
            } => {
                let connected = self
                    .registry
                    .get(id)
                    .map(|p| p.state == PeerState::Connected)
                    .unwrap_or(false);
                if !connected {
                    debug!(peer = %id, "data before handshake completion dropped");
                    return;
                }
                let max = self
                    .registry
                    .get(id)
                    .and_then(|p| p.negotiated)
                    .map(|n| n.effective_max)
                    .unwrap_or(0);
                let Some(link) = self.links.get_mut(&id) else {
                    return;
                };
                match frag::on_frame(
                    &mut link.reassembly,
                    total_length,
                    offset,
                    flags,
                    &payload,
                    max,
                ) {
                    Ok(Some(data)) => {
                        self.stats.messages_received += 1;
                        events.push(Event::Message { peer: id, data });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(peer = %id, error = %e, "reassembly fault");
                        self.abort_violation(id, events);
                    }
                }
            }
            Message::Pressure { level } => {
                if let Some(link) = self.links.get_mut(&id) {
                    link.remote_pressure = level.min(100);
                    debug!(peer = %id, level, "peer pressure update");
                }
            }
            Message::Bye => {
                self.finish_close(id, DisconnectReason::RemoteClose, events);
            }
        }
    }

    fn queue_frame(&mut self, id: PeerId, bytes: Vec<u8>) {
        if let Some(link) = self.links.get_mut(&id) {
            link.outbound.push_back(bytes);
        }
        self.kick(id);
    }

    /// Push the next queued frame if the connection is idle. Send faults
    /// schedule a close for the next poll rather than failing the caller.
    fn kick(&mut self, id: PeerId) {
        let Some(link) = self.links.get_mut(&id) else {
            return;
        };
        if link.in_flight {
            return;
        }
        let Some(frame) = link.outbound.pop_front() else {
            return;
        };
        link.in_flight = true;
        let conn = link.conn;
        let len = frame.len() as u64;
        match self.transport.send_stream(conn, &frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += len;
            }
            Err(e) => {
                warn!(peer = %id, error = %e, "stream send failed");
                self.pending_closes
                    .push((id, DisconnectReason::TransportError));
            }
        }
    }

    fn abort_violation(&mut self, id: PeerId, events: &mut Vec<Event>) {
        self.stats.protocol_violations += 1;
        self.finish_close(id, DisconnectReason::ProtocolViolation, events);
    }

    /// Tear down one connection and report it. The link map guards the
    /// exactly-once contract: a second close of the same connection finds
    /// no link and does nothing.
    fn finish_close(&mut self, id: PeerId, reason: DisconnectReason, events: &mut Vec<Event>) {
        let Some(link) = self.links.remove(&id) else {
            return;
        };
        self.conn_to_peer.remove(&link.conn);
        self.transport.close(link.conn);
        self.registry.set_state(id, PeerState::Closing);
        self.registry.set_state(id, PeerState::Closed);
        if let Some(peer) = self.registry.get_mut(id) {
            peer.remote_caps = None;
            peer.negotiated = None;
            peer.last_seen = self.now;
        }
        info!(peer = %id, %reason, "disconnected");
        events.push(Event::PeerDisconnected { peer: id, reason });
    }

    fn run_timers(&mut self, events: &mut Vec<Event>) {
        if self.discovery_active
            && self.now.saturating_sub(self.last_announce) >= self.config.discovery_interval
        {
            self.send_beacon(BeaconKind::Announce);
            self.last_announce = self.now;
        }

        for id in self.registry.sweep(self.now, self.config.peer_timeout()) {
            self.stats.peers_evicted += 1;
            events.push(Event::PeerLost { peer: id });
        }

        let stuck: Vec<PeerId> = self
            .links
            .iter()
            .filter(|(id, link)| {
                let mid_handshake = self
                    .registry
                    .get(**id)
                    .map(|p| {
                        matches!(p.state, PeerState::Connecting | PeerState::Handshaking)
                    })
                    .unwrap_or(false);
                mid_handshake
                    && self.now.saturating_sub(link.opened_at) > self.config.connect_timeout
            })
            .map(|(id, _)| *id)
            .collect();
        for id in stuck {
            warn!(peer = %id, "connection attempt timed out");
            self.finish_close(id, DisconnectReason::Timeout, events);
        }
    }
}
