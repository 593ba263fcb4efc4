//! Capability negotiation.
//!
//! Both sides of a new connection exchange their limits; the effective
//! contract is the element-wise minimum, so negotiation is symmetric: both
//! ends compute identical values without a leader.

use serde::{Deserialize, Serialize};

/// Smallest chunk pressure throttling will shrink to.
pub const MIN_CHUNK: u32 = 64;

/// Pressure must move by at least this much before we bother telling the
/// peer.
pub const PRESSURE_REPORT_STEP: u8 = 25;

/// Pressure at or above this halves the outgoing chunk size.
pub const PRESSURE_THROTTLE: u8 = 50;
/// Pressure at or above this quarters the outgoing chunk size.
pub const PRESSURE_CRITICAL: u8 = 90;

/// Limits one side advertises during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub max_message_size: u32,
    pub preferred_chunk: u32,
    /// Receive-buffer fullness, 0..=100. Advisory.
    pub buffer_pressure: u8,
}

/// The agreed contract for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Largest application message either side will send.
    pub effective_max: u32,
    /// Fragment size, never above `effective_max`.
    pub effective_chunk: u32,
}

/// Combine local and remote limits. Symmetric by construction.
pub fn negotiate(local: &Capabilities, remote: &Capabilities) -> Negotiated {
    let effective_max = local.max_message_size.min(remote.max_message_size);
    let effective_chunk = local
        .preferred_chunk
        .min(remote.preferred_chunk)
        .min(effective_max)
        .max(1);
    Negotiated {
        effective_max,
        effective_chunk,
    }
}

impl Negotiated {
    /// Chunk size to use given the peer's last reported pressure. High
    /// pressure shrinks chunks so a constrained receiver sees smaller,
    /// more interruptible deliveries.
    pub fn chunk_under_pressure(&self, pressure: u8) -> u32 {
        let chunk = if pressure >= PRESSURE_CRITICAL {
            self.effective_chunk / 4
        } else if pressure >= PRESSURE_THROTTLE {
            self.effective_chunk / 2
        } else {
            self.effective_chunk
        };
        chunk.max(MIN_CHUNK.min(self.effective_chunk)).max(1)
    }

    /// Whether a message of `len` bytes needs more than one fragment.
    pub fn needs_fragmentation(&self, len: usize) -> bool {
        len as u64 > self.effective_chunk as u64
    }
}

/// Whether a pressure change is big enough to report to the peer.
pub fn pressure_report_due(last_reported: u8, current: u8) -> bool {
    last_reported.abs_diff(current) >= PRESSURE_REPORT_STEP
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(max: u32, chunk: u32) -> Capabilities {
        Capabilities {
            max_message_size: max,
            preferred_chunk: chunk,
            buffer_pressure: 0,
        }
    }

    #[test]
    fn negotiation_takes_minimums() {
        let n = negotiate(&caps(8192, 1024), &caps(4096, 512));
        assert_eq!(n.effective_max, 4096);
        assert_eq!(n.effective_chunk, 512);
    }

    #[test]
    fn negotiation_is_symmetric() {
        let a = caps(8192, 2048);
        let b = caps(2048, 256);
        assert_eq!(negotiate(&a, &b), negotiate(&b, &a));
    }

    #[test]
    fn chunk_never_exceeds_effective_max() {
        let n = negotiate(&caps(512, 4096), &caps(8192, 4096));
        assert_eq!(n.effective_max, 512);
        assert_eq!(n.effective_chunk, 512);
    }

    #[test]
    fn pressure_tiers_shrink_chunk() {
        let n = negotiate(&caps(8192, 1024), &caps(8192, 1024));
        assert_eq!(n.chunk_under_pressure(0), 1024);
        assert_eq!(n.chunk_under_pressure(49), 1024);
        assert_eq!(n.chunk_under_pressure(50), 512);
        assert_eq!(n.chunk_under_pressure(89), 512);
        assert_eq!(n.chunk_under_pressure(90), 256);
        assert_eq!(n.chunk_under_pressure(100), 256);
    }

    #[test]
    fn throttled_chunk_has_a_floor() {
        let n = negotiate(&caps(8192, 100), &caps(8192, 100));
        assert_eq!(n.chunk_under_pressure(100), MIN_CHUNK);
        // A contract already below the floor is not inflated.
        let tiny = negotiate(&caps(32, 32), &caps(32, 32));
        assert_eq!(tiny.chunk_under_pressure(100), 32);
    }

    #[test]
    fn report_step_gates_pressure_updates() {
        assert!(!pressure_report_due(40, 50));
        assert!(pressure_report_due(40, 65));
        assert!(pressure_report_due(90, 10));
        assert!(!pressure_report_due(0, 24));
        assert!(pressure_report_due(0, 25));
    }
}
