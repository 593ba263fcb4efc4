//! Message fragmentation and reassembly.
//!
//! A message of length `L` travels as `ceil(L / chunk)` frames (one frame
//! for an empty message). Each frame carries the message's total length,
//! its own offset, and boundary flags; the first frame has [`FRAME_FIRST`]
//! set and the last has [`FRAME_LAST`]. A single-frame message carries
//! both. Each connection reassembles at most one message at a time, and any
//! inconsistency aborts the connection rather than resynchronizing.

use thiserror::Error;

/// Frame carries the first bytes of a message.
pub const FRAME_FIRST: u16 = 0x0001;
/// Frame carries the last bytes of a message.
pub const FRAME_LAST: u16 = 0x0002;

/// One outgoing fragment, ready to be wrapped in a wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub total_length: u32,
    pub offset: u32,
    pub flags: u16,
    pub payload: Vec<u8>,
}

/// Split `data` into frames of at most `chunk` bytes. Always yields at
/// least one frame; an empty message becomes a single empty frame with
/// both boundary flags set.
pub fn fragment(data: &[u8], chunk: u32) -> Vec<Frame> {
    let chunk = chunk.max(1) as usize;
    let total = data.len() as u32;
    if data.is_empty() {
        return vec![Frame {
            total_length: 0,
            offset: 0,
            flags: FRAME_FIRST | FRAME_LAST,
            payload: Vec::new(),
        }];
    }
    let mut frames = Vec::with_capacity(data.len().div_ceil(chunk));
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + chunk).min(data.len());
        let mut flags = 0u16;
        if offset == 0 {
            flags |= FRAME_FIRST;
        }
        if end == data.len() {
            flags |= FRAME_LAST;
        }
        frames.push(Frame {
            total_length: total,
            offset: offset as u32,
            flags,
            payload: data[offset..end].to_vec(),
        });
        offset = end;
    }
    frames
}

/// Reassembly faults. All of them mean the sender is desynchronized or
/// hostile; the connection is aborted, never resynchronized.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FragError {
    #[error("announced message of {total} bytes exceeds negotiated maximum {max}")]
    Oversized { total: u32, max: u32 },
    #[error("first fragment while a {pending}-byte message is still in progress")]
    AlreadyActive { pending: u32 },
    #[error("continuation fragment with no message in progress")]
    NotActive,
    #[error("fragment offset {got}, expected {expected}")]
    OffsetMismatch { expected: u32, got: u32 },
    #[error("fragment announces total {got}, message started with {expected}")]
    TotalMismatch { expected: u32, got: u32 },
    #[error("fragments overrun the announced length {total}")]
    Overrun { total: u32 },
    #[error("last fragment at {got} of {total} announced bytes")]
    Truncated { total: u32, got: u32 },
}

/// In-progress reassembly for one connection.
#[derive(Debug)]
pub struct Reassembly {
    total: u32,
    buf: Vec<u8>,
}

impl Reassembly {
    pub fn total_length(&self) -> u32 {
        self.total
    }

    pub fn received(&self) -> u32 {
        self.buf.len() as u32
    }
}

/// Feed one received frame into the connection's reassembly slot.
///
/// Returns `Ok(Some(message))` when the frame completes a message,
/// `Ok(None)` when more frames are expected. On error the slot is left
/// cleared and the caller must abort the connection.
pub fn on_frame(
    slot: &mut Option<Reassembly>,
    total_length: u32,
    offset: u32,
    flags: u16,
    payload: &[u8],
    max_message: u32,
) -> Result<Option<Vec<u8>>, FragError> {
    if flags & FRAME_FIRST != 0 {
        if let Some(active) = slot.take() {
            return Err(FragError::AlreadyActive {
                pending: active.total,
            });
        }
        if total_length > max_message {
            return Err(FragError::Oversized {
                total: total_length,
                max: max_message,
            });
        }
        if offset != 0 {
            return Err(FragError::OffsetMismatch {
                expected: 0,
                got: offset,
            });
        }
        *slot = Some(Reassembly {
            total: total_length,
            buf: Vec::with_capacity(total_length as usize),
        });
    }

    let Some(active) = slot.as_mut() else {
        return Err(FragError::NotActive);
    };

    if total_length != active.total {
        let expected = active.total;
        *slot = None;
        return Err(FragError::TotalMismatch {
            expected,
            got: total_length,
        });
    }
    if offset != active.buf.len() as u32 {
        let expected = active.buf.len() as u32;
        *slot = None;
        return Err(FragError::OffsetMismatch {
            expected,
            got: offset,
        });
    }
    if active.buf.len() + payload.len() > active.total as usize {
        let total = active.total;
        *slot = None;
        return Err(FragError::Overrun { total });
    }
    active.buf.extend_from_slice(payload);

    if flags & FRAME_LAST != 0 {
        let done = slot.take().unwrap_or_else(|| unreachable!());
        if done.buf.len() != done.total as usize {
            return Err(FragError::Truncated {
                total: done.total,
                got: done.buf.len() as u32,
            });
        }
        return Ok(Some(done.buf));
    }
    Ok(None)
}
