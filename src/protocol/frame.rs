//! Length-prefixed framing
//!
//! ## Wire Format
//! ```text
//! ┌───────────────────┬──────────────────────────────┐
//! │ Len (4, u32 LE)   │  Payload (Len bytes)         │
//! └───────────────────┴──────────────────────────────┘
//! ```
//!
//! The length counts payload bytes only. There is no magic, version or
//! checksum; TCP provides ordering and integrity. A frame is complete once
//! `4 + Len` bytes have arrived.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Codec;
use crate::error::{GamewireError, Result};

/// Length prefix size
pub const LEN_PREFIX_SIZE: usize = 4;

/// Encode `item` with `codec` and prepend its length
pub fn pack<C: Codec>(codec: &C, item: &C::Item) -> Result<Bytes> {
    let payload = codec.encode(item)?;
    frame_payload(&payload)
}

/// Prepend the length prefix to an already-encoded payload
pub fn frame_payload(payload: &[u8]) -> Result<Bytes> {
    if payload.len() > u32::MAX as usize {
        return Err(GamewireError::FrameTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }

    let mut frame = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
    frame.put_u32_le(payload.len() as u32);
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// Peek one frame at the front of `bytes`
///
/// Returns the payload slice and the total number of bytes the frame
/// occupies (prefix included), or `None` when the frame is not complete yet.
pub fn peek_frame(bytes: &[u8], max_frame_size: usize) -> Result<Option<(&[u8], usize)>> {
    if bytes.len() < LEN_PREFIX_SIZE {
        return Ok(None);
    }

    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > max_frame_size {
        return Err(GamewireError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let total = LEN_PREFIX_SIZE + len;
    if bytes.len() < total {
        return Ok(None);
    }

    Ok(Some((&bytes[LEN_PREFIX_SIZE..total], total)))
}

/// Remove one complete frame from the front of `buf`
///
/// Leaves `buf` untouched when the frame is incomplete.
pub fn try_unpack(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>> {
    let total = match peek_frame(buf, max_frame_size)? {
        Some((_, total)) => total,
        None => return Ok(None),
    };

    buf.advance(LEN_PREFIX_SIZE);
    Ok(Some(buf.split_to(total - LEN_PREFIX_SIZE).freeze()))
}

/// Reassembly buffer for partial and merged reads
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameBuffer {
    pub fn new(max_frame_size: usize) -> Self {
        Self::with_capacity(4 * 1024, max_frame_size)
    }

    pub fn with_capacity(capacity: usize, max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            max_frame_size,
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Extract the next complete payload, if any
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        try_unpack(&mut self.buf, self.max_frame_size)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }
}
