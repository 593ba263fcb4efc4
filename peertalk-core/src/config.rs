//! Engine configuration. Zero means "use the default" for every numeric
//! field, so an all-zero struct (or a sparse config file) yields a working
//! setup.

use serde::Deserialize;

pub const DEFAULT_DISCOVERY_PORT: u16 = 7353;
pub const DEFAULT_LISTEN_PORT: u16 = 7354;
pub const DEFAULT_MAX_PEERS: u16 = 16;
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 8192;
pub const DEFAULT_PREFERRED_CHUNK: u32 = 1024;
/// Announce cadence in ticks; at a millisecond tick source this is 5s.
pub const DEFAULT_DISCOVERY_INTERVAL: u64 = 5000;
/// Silence threshold, in announce intervals, before a peer is evicted.
pub const DEFAULT_TIMEOUT_INTERVALS: u64 = 3;
/// Ticks a connection attempt may sit in the handshake before it is
/// abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 15_000;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Name advertised in beacons, at most 31 bytes (longer names are
    /// rejected at startup).
    pub local_name: String,
    /// UDP port beacons are broadcast and received on.
    pub discovery_port: u16,
    /// TCP-style port announced for inbound stream connections.
    pub listen_port: u16,
    /// Registry capacity; beacons beyond this are dropped.
    pub max_peers: u16,
    /// Largest application message we accept or send, before negotiation.
    pub max_message_size: u32,
    /// Fragment size we advertise, clamped to the negotiated maximum.
    pub preferred_chunk: u32,
    /// Ticks between announce beacons.
    pub discovery_interval: u64,
    /// Announce intervals of silence before eviction.
    pub timeout_intervals: u64,
    /// Ticks before an unfinished connection attempt is abandoned.
    pub connect_timeout: u64,
    /// Split large messages into chunks. When off, any message that fits
    /// the negotiated maximum still travels as a single frame.
    #[serde(default = "default_true")]
    pub enable_fragmentation: bool,
    /// Accept inbound connections without a host decision.
    #[serde(default = "default_true")]
    pub auto_accept: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            local_name: String::new(),
            discovery_port: 0,
            listen_port: 0,
            max_peers: 0,
            max_message_size: 0,
            preferred_chunk: 0,
            discovery_interval: 0,
            timeout_intervals: 0,
            connect_timeout: 0,
            enable_fragmentation: true,
            auto_accept: true,
        }
    }
}

impl Config {
    /// Apply defaults to every zero field, returning the effective
    /// configuration the engine runs with.
    pub fn resolve(&self) -> Config {
        fn or16(v: u16, d: u16) -> u16 {
            if v == 0 { d } else { v }
        }
        fn or32(v: u32, d: u32) -> u32 {
            if v == 0 { d } else { v }
        }
        fn or64(v: u64, d: u64) -> u64 {
            if v == 0 { d } else { v }
        }
        let max_message_size = or32(self.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        Config {
            local_name: if self.local_name.is_empty() {
                "peer".to_string()
            } else {
                self.local_name.clone()
            },
            discovery_port: or16(self.discovery_port, DEFAULT_DISCOVERY_PORT),
            listen_port: or16(self.listen_port, DEFAULT_LISTEN_PORT),
            max_peers: or16(self.max_peers, DEFAULT_MAX_PEERS),
            max_message_size,
            preferred_chunk: or32(self.preferred_chunk, DEFAULT_PREFERRED_CHUNK)
                .min(max_message_size),
            discovery_interval: or64(self.discovery_interval, DEFAULT_DISCOVERY_INTERVAL),
            timeout_intervals: or64(self.timeout_intervals, DEFAULT_TIMEOUT_INTERVALS),
            connect_timeout: or64(self.connect_timeout, DEFAULT_CONNECT_TIMEOUT),
            enable_fragmentation: self.enable_fragmentation,
            auto_accept: self.auto_accept,
        }
    }

    /// Eviction threshold in ticks.
    pub fn peer_timeout(&self) -> u64 {
        self.discovery_interval.saturating_mul(self.timeout_intervals)
    }
}
