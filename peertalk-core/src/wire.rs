//! Wire encoding for discovery beacons and stream frames.
//!
//! Stream frames are a 4-byte little-endian length prefix followed by a
//! bincode-serialized [`Message`]. Beacons travel as bare bincode in a
//! single datagram, no prefix. Unknown or mismatched protocol versions are
//! rejected at decode time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol version advertised in beacons and the handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hard upper bound on an encoded frame body. Anything larger is treated
/// as a corrupt or hostile stream.
pub const MAX_FRAME_LEN: u32 = 256 * 1024;

/// Longest peer name carried in a beacon, in bytes.
pub const MAX_PEER_NAME: usize = 31;

const LEN_PREFIX: usize = 4;

/// Discovery beacon flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeaconKind {
    /// Periodic presence announcement.
    Announce,
    /// Deliberate departure; lets listeners evict without waiting for the
    /// silence threshold.
    Goodbye,
}

/// Datagram periodically broadcast on the discovery port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    pub version: u8,
    pub kind: BeaconKind,
    /// Per-process instance number; a changed instance at the same address
    /// means the peer restarted.
    pub instance: u32,
    pub name: String,
    /// Port the sender accepts stream connections on.
    pub listen_port: u16,
}

/// Messages exchanged over an established stream connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// First message in each direction after the stream opens.
    Capabilities {
        version: u8,
        max_message_size: u32,
        preferred_chunk: u32,
        buffer_pressure: u8,
    },
    /// One fragment of an application message. A message that fits in a
    /// single chunk still travels as one `Data` frame with both boundary
    /// flags set.
    Data {
        total_length: u32,
        offset: u32,
        flags: u16,
        payload: Vec<u8>,
    },
    /// Advisory receive-buffer pressure update, 0..=100.
    Pressure { level: u8 },
    /// Orderly close; no further frames follow.
    Bye,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("not enough bytes for a complete frame")]
    NeedMore,
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },
    #[error("unsupported protocol version {0}")]
    BadVersion(u8),
    #[error("peer name exceeds {MAX_PEER_NAME} bytes")]
    NameTooLong,
    #[error("malformed payload: {0}")]
    Malformed(#[from] bincode::Error),
}

/// Encode a message with its length prefix, ready for `send_stream`.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, WireError> {
    let body = bincode::serialize(msg)?;
    let len = body.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut out = Vec::with_capacity(LEN_PREFIX + body.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one message from the front of `buf`.
///
/// Returns the message and the number of bytes consumed. `NeedMore` means
/// the buffer holds a partial frame and the caller should retry after the
/// next read; any other error means the stream is unrecoverable.
pub fn decode_frame(buf: &[u8]) -> Result<(Message, usize), WireError> {
    if buf.len() < LEN_PREFIX {
        return Err(WireError::NeedMore);
    }
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let total = LEN_PREFIX + len as usize;
    if buf.len() < total {
        return Err(WireError::NeedMore);
    }
    let msg = bincode::deserialize(&buf[LEN_PREFIX..total])?;
    Ok((msg, total))
}

/// Encode a beacon datagram. Names over [`MAX_PEER_NAME`] bytes are
/// rejected rather than truncated.
pub fn encode_beacon(beacon: &Beacon) -> Result<Vec<u8>, WireError> {
    if beacon.name.len() > MAX_PEER_NAME {
        return Err(WireError::NameTooLong);
    }
    Ok(bincode::serialize(beacon)?)
}

/// Decode a beacon datagram, enforcing version and name bounds.
pub fn decode_beacon(data: &[u8]) -> Result<Beacon, WireError> {
    let beacon: Beacon = bincode::deserialize(data)?;
    if beacon.version != PROTOCOL_VERSION {
        return Err(WireError::BadVersion(beacon.version));
    }
    if beacon.name.len() > MAX_PEER_NAME {
        return Err(WireError::NameTooLong);
    }
    Ok(beacon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trip() {
        let msg = Message::Data {
            total_length: 11,
            offset: 0,
            flags: 0x0003,
            payload: b"hello world".to_vec(),
        };
        let bytes = encode_frame(&msg).unwrap();
        let (decoded, used) = decode_frame(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn partial_frame_needs_more() {
        let bytes = encode_frame(&Message::Bye).unwrap();
        for cut in 0..bytes.len() {
            match decode_frame(&bytes[..cut]) {
                Err(WireError::NeedMore) => {}
                other => panic!("cut {cut}: expected NeedMore, got {other:?}"),
            }
        }
    }

    #[test]
    fn decode_consumes_one_frame_from_a_run() {
        let mut buf = encode_frame(&Message::Pressure { level: 60 }).unwrap();
        let second = encode_frame(&Message::Bye).unwrap();
        buf.extend_from_slice(&second);
        let (first, used) = decode_frame(&buf).unwrap();
        assert_eq!(first, Message::Pressure { level: 60 });
        let (next, used2) = decode_frame(&buf[used..]).unwrap();
        assert_eq!(next, Message::Bye);
        assert_eq!(used + used2, buf.len());
    }

    #[test]
    fn oversized_length_prefix_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            decode_frame(&buf),
            Err(WireError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn beacon_round_trip() {
        let beacon = Beacon {
            version: PROTOCOL_VERSION,
            kind: BeaconKind::Announce,
            instance: 0xDEAD_BEEF,
            name: "mac-plus".into(),
            listen_port: 7354,
        };
        let bytes = encode_beacon(&beacon).unwrap();
        assert_eq!(decode_beacon(&bytes).unwrap(), beacon);
    }

    #[test]
    fn beacon_version_mismatch_rejected() {
        let beacon = Beacon {
            version: PROTOCOL_VERSION + 1,
            kind: BeaconKind::Announce,
            instance: 1,
            name: "future".into(),
            listen_port: 1,
        };
        let bytes = bincode::serialize(&beacon).unwrap();
        assert!(matches!(
            decode_beacon(&bytes),
            Err(WireError::BadVersion(_))
        ));
    }

    #[test]
    fn long_name_rejected_on_encode() {
        let beacon = Beacon {
            version: PROTOCOL_VERSION,
            kind: BeaconKind::Announce,
            instance: 1,
            name: "x".repeat(MAX_PEER_NAME + 1),
            listen_port: 1,
        };
        assert!(matches!(encode_beacon(&beacon), Err(WireError::NameTooLong)));
    }

    #[test]
    fn garbage_datagram_is_malformed() {
        assert!(decode_beacon(&[0xFF; 40]).is_err());
    }
}
