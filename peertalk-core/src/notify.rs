//! Interrupt-safe completion handoff.
//!
//! Backends whose network stack completes work at interrupt time hand
//! results to the engine through a fixed-capacity single-producer,
//! single-consumer ring of pre-allocated slots. The producer side
//! ([`Notifier`]) is wait-free and never allocates, locks, or logs, so it is
//! safe to call from an interrupt or completion routine. The consumer side
//! ([`Drain`]) is only ever used by the engine's poll loop.
//!
//! This is deliberately not a general message queue: slots are `Copy`,
//! capacity is fixed at construction, and a full ring drops the event and
//! latches a sticky overflow flag that the poll loop reports later.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::transport::ConnId;

/// Largest datagram payload carried inline through the ring.
pub const DATAGRAM_MAX: usize = 256;

/// A received datagram, payload stored inline so the producer never
/// allocates.
#[derive(Clone, Copy)]
pub struct Datagram {
    pub from_addr: u32,
    pub from_port: u16,
    pub len: u16,
    pub data: [u8; DATAGRAM_MAX],
}

impl Datagram {
    /// Build a slot from a received payload. Payloads over [`DATAGRAM_MAX`]
    /// are truncated; the engine rejects such beacons at decode time anyway.
    pub fn new(from_addr: u32, from_port: u16, payload: &[u8]) -> Self {
        let len = payload.len().min(DATAGRAM_MAX);
        let mut data = [0u8; DATAGRAM_MAX];
        data[..len].copy_from_slice(&payload[..len]);
        Datagram {
            from_addr,
            from_port,
            len: len as u16,
            data,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl std::fmt::Debug for Datagram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Datagram")
            .field("from_addr", &self.from_addr)
            .field("from_port", &self.from_port)
            .field("len", &self.len)
            .finish()
    }
}

/// Completion events a backend reports to the engine.
///
/// Everything except `Datagram` is a bare flag: the data behind a `Readable`
/// is pulled in main context via `recv_stream`, never copied at interrupt
/// time.
#[derive(Debug, Clone, Copy)]
pub enum TransportEvent {
    /// A datagram arrived on the discovery socket.
    Datagram(Datagram),
    /// An outbound `open` completed.
    Opened { conn: ConnId },
    /// An inbound stream connection was accepted.
    Accepted { conn: ConnId, addr: u32, port: u16 },
    /// Stream data is available to read.
    Readable { conn: ConnId },
    /// The previously queued `send_stream` finished.
    SendComplete { conn: ConnId },
    /// The remote side closed the stream.
    Closed { conn: ConnId },
    /// The stream failed.
    Error { conn: ConnId },
}

struct Ring {
    slots: Box<[UnsafeCell<MaybeUninit<TransportEvent>>]>,
    mask: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
    overflow: AtomicBool,
}

// One producer (Notifier) writes slots the consumer (Drain) has released;
// one consumer reads slots the producer has published. The head/tail
// acquire/release pairs order the slot accesses.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

/// Producer half, handed to the transport backend at init.
///
/// Not `Clone`: the ring supports exactly one producer.
pub struct Notifier {
    ring: Arc<Ring>,
}

/// Consumer half, kept by the engine.
pub struct Drain {
    ring: Arc<Ring>,
}

/// Create a handoff ring holding up to `capacity` events (rounded up to a
/// power of two, minimum 2).
pub fn ring(capacity: usize) -> (Notifier, Drain) {
    let cap = capacity.max(2).next_power_of_two();
    let slots = (0..cap)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let ring = Arc::new(Ring {
        slots,
        mask: cap - 1,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
        overflow: AtomicBool::new(false),
    });
    (
        Notifier { ring: ring.clone() },
        Drain { ring },
    )
}

impl Notifier {
    /// Publish one event. Wait-free, no allocation, no logging; safe from
    /// interrupt context. Returns `false` and latches the overflow flag if
    /// the ring is full.
    pub fn push(&self, event: TransportEvent) -> bool {
        let r = &*self.ring;
        let tail = r.tail.load(Ordering::Relaxed);
        let head = r.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) > r.mask {
            r.overflow.store(true, Ordering::Relaxed);
            return false;
        }
        unsafe {
            (*r.slots[tail & r.mask].get()).write(event);
        }
        r.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }
}

impl Drain {
    /// Take the next pending event, if any.
    pub fn pop(&self) -> Option<TransportEvent> {
        let r = &*self.ring;
        let head = r.head.load(Ordering::Relaxed);
        let tail = r.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let event = unsafe { (*r.slots[head & r.mask].get()).assume_init() };
        r.head.store(head.wrapping_add(1), Ordering::Release);
        Some(event)
    }

    /// Read and clear the sticky overflow flag.
    pub fn take_overflow(&self) -> bool {
        self.ring.overflow.swap(false, Ordering::Relaxed)
    }

    /// Slot capacity of the ring.
    pub fn capacity(&self) -> usize {
        self.ring.mask + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable(n: u32) -> TransportEvent {
        TransportEvent::Readable { conn: ConnId(n) }
    }

    fn conn_of(ev: TransportEvent) -> u32 {
        match ev {
            TransportEvent::Readable { conn } => conn.0,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn push_pop_fifo() {
        let (tx, rx) = ring(8);
        for n in 0..5 {
            assert!(tx.push(readable(n)));
        }
        for n in 0..5 {
            assert_eq!(conn_of(rx.pop().unwrap()), n);
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn full_ring_drops_and_latches_overflow() {
        let (tx, rx) = ring(4);
        for n in 0..4 {
            assert!(tx.push(readable(n)));
        }
        assert!(!tx.push(readable(99)));
        assert!(rx.take_overflow());
        // Flag is cleared by the read.
        assert!(!rx.take_overflow());
        // The four published events are intact.
        for n in 0..4 {
            assert_eq!(conn_of(rx.pop().unwrap()), n);
        }
        assert!(rx.pop().is_none());
    }

    #[test]
    fn wraps_around_capacity() {
        let (tx, rx) = ring(4);
        for round in 0..10u32 {
            assert!(tx.push(readable(round)));
            assert_eq!(conn_of(rx.pop().unwrap()), round);
        }
    }

    #[test]
    fn datagram_payload_inline() {
        let d = Datagram::new(0x0A00_0001, 7353, b"hello");
        assert_eq!(d.payload(), b"hello");
        let big = vec![0xAB; DATAGRAM_MAX + 50];
        let d = Datagram::new(1, 2, &big);
        assert_eq!(d.payload().len(), DATAGRAM_MAX);
    }

    #[test]
    fn cross_thread_handoff() {
        let (tx, rx) = ring(64);
        let producer = std::thread::spawn(move || {
            for n in 0..1000u32 {
                while !tx.push(readable(n)) {
                    std::thread::yield_now();
                }
            }
        });
        let mut next = 0u32;
        while next < 1000 {
            if let Some(ev) = rx.pop() {
                assert_eq!(conn_of(ev), next);
                next += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
