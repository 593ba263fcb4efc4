//! Error taxonomy for the engine API.

use thiserror::Error;

use crate::peer::PeerId;
use crate::transport::TransportError;
use crate::wire::WireError;

/// Errors returned by [`Engine`](crate::engine::Engine) operations.
///
/// Only transport init failure is fatal; everything else leaves the engine
/// running.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The peer exists but is not in a state the operation applies to,
    /// e.g. sending to a peer that never connected.
    #[error("peer {peer} is {state}, not connected")]
    NotConnected { peer: PeerId, state: &'static str },

    /// The peer is closed or closing and cannot be (re)connected until it
    /// is rediscovered.
    #[error("peer {peer} is {state} and cannot be connected")]
    NotConnectable { peer: PeerId, state: &'static str },

    #[error("message of {len} bytes exceeds negotiated maximum {max}")]
    MessageTooLarge { len: usize, max: u32 },

    #[error("engine is shut down")]
    ShutDown,
}

/// Why a peer left the CONNECTED state. Reported exactly once per
/// connection, with the disconnect event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The host asked for the disconnect.
    LocalRequest,
    /// The remote side closed the stream or sent an orderly goodbye.
    RemoteClose,
    /// The remote side broke the protocol; the connection was aborted.
    ProtocolViolation,
    /// The underlying stream failed.
    TransportError,
    /// The connection attempt never completed in time.
    Timeout,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisconnectReason::LocalRequest => "local request",
            DisconnectReason::RemoteClose => "remote close",
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::Timeout => "timeout",
        };
        f.write_str(s)
    }
}
