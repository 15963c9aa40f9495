use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChannelError, Result};

/// Frame header: payload length (4 bytes, big-endian).
pub const HEADER_SIZE: usize = 4;

/// Default maximum frame payload: 64 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// One complete unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Append `payload` to `dst` as one frame.
///
/// ```text
/// ┌──────────────────────┬─────────────────────┐
/// │ length: u32, BE      │ payload             │
/// └──────────────────────┴─────────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], max_frame_size: usize, dst: &mut BytesMut) -> Result<()> {
    let max = max_frame_size.min(u32::MAX as usize);
    if payload.len() > max {
        return Err(ChannelError::FrameTooLarge {
            size: payload.len(),
            max,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Peek at the declared payload length without consuming anything.
pub fn declared_length(src: &[u8]) -> Option<usize> {
    let header: [u8; HEADER_SIZE] = src.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

/// Take the first complete frame off the front of `src`.
///
/// `Ok(None)` leaves `src` untouched. The size check runs on the header
/// alone, so an oversized frame fails before any of its payload is buffered.
pub fn decode_frame(src: &mut BytesMut, max_frame_size: usize) -> Result<Option<Frame>> {
    let Some(payload_len) = declared_length(&src[..]) else {
        return Ok(None);
    };

    if payload_len > max_frame_size {
        return Err(ChannelError::FrameTooLarge {
            size: payload_len,
            max: max_frame_size,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { payload }))
}

/// The error for bytes left over when the stream ended.
pub(crate) fn truncated(buffered: &[u8]) -> ChannelError {
    let expected = match declared_length(buffered) {
        Some(len) => HEADER_SIZE + len,
        None => HEADER_SIZE,
    };
    ChannelError::Truncated {
        expected,
        received: buffered.len(),
    }
}

/// Configuration for framed I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum frame payload size in bytes. Default: 64 MiB.
    pub max_frame_size: usize,
    /// Read timeout for blocking receives. `None` blocks until data or close.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking sends. `None` blocks until the peer drains.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
