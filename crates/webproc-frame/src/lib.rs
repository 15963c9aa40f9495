//! Length-prefixed framing and the duplex message channel.
//!
//! Every frame on the wire is a 4-byte big-endian payload length followed by
//! the payload. The declared length is checked against a configurable ceiling
//! before any receive buffer grows for it.
//!
//! [`Channel`] wraps a `ChannelEndpoint` into a thread-safe framed channel:
//! sends are serialized by a single write lock, receives block until a whole
//! frame is available, and `close()` wakes whoever is blocked.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::FrameCodec;
pub use channel::Channel;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
pub use error::{ChannelError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
