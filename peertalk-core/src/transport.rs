//! Transport backend interface: the engine drives all I/O through this trait.

use thiserror::Error;

use crate::notify::Notifier;

/// Monotonic logical clock value in backend-native units.
///
/// Only ever read from the main context via [`Transport::get_ticks`]; all
/// engine timeouts are computed from this counter, never from wall-clock
/// blocking.
pub type Tick = u64;

/// Opaque handle for a stream connection owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u32);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Errors reported by a transport backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// One-time setup failed. Fatal to engine startup.
    #[error("transport init failed: {0}")]
    Init(String),

    /// Operation addressed a connection the backend does not know.
    #[error("unknown connection {0}")]
    UnknownConn(ConnId),

    /// A send or open could not be issued.
    #[error("send failed: {0}")]
    Send(String),

    /// Backend-level I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend contract, one implementation per platform.
///
/// All methods are called from the main (poll) context only. Completion of
/// asynchronous work is reported through the [`Notifier`] handed to `init`;
/// backends whose network stack calls back at interrupt time may use that
/// notifier from interrupt context, and nothing else.
pub trait Transport {
    /// One-time setup. Failure is fatal to engine startup.
    fn init(&mut self, notifier: Notifier) -> Result<(), TransportError>;

    /// Release backend resources. Idempotent.
    fn shutdown(&mut self);

    /// Non-blocking pump of backend I/O. Must not block; observed progress
    /// is reported as events through the notifier.
    fn poll(&mut self);

    /// Monotonic logical clock. Main context only.
    fn get_ticks(&self) -> Tick;

    /// Free memory estimate, informational only.
    fn get_free_mem(&self) -> usize {
        usize::MAX
    }

    /// Largest allocatable block estimate, informational only.
    fn get_max_block(&self) -> usize {
        usize::MAX
    }

    /// Best-effort datagram send, used for discovery broadcast.
    fn send_udp(&mut self, addr: u32, port: u16, data: &[u8]) -> Result<(), TransportError>;

    /// Begin opening a stream connection. Completion arrives as an
    /// `Opened` (or `Error`) event.
    fn open(&mut self, addr: u32, port: u16) -> Result<ConnId, TransportError>;

    /// Close a stream connection. Idempotent; no event is produced for a
    /// locally requested close.
    fn close(&mut self, conn: ConnId);

    /// Queue bytes on a stream. Non-blocking; completion arrives as a
    /// `SendComplete` event. The engine keeps at most one send outstanding
    /// per connection.
    fn send_stream(&mut self, conn: ConnId, data: &[u8]) -> Result<(), TransportError>;

    /// Non-blocking read into `buf`. Returns the number of bytes read,
    /// 0 when nothing is pending. Main context only.
    fn recv_stream(&mut self, conn: ConnId, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Pseudo-address meaning "broadcast" for [`Transport::send_udp`].
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;
