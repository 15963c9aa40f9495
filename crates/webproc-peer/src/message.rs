use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MessageError;

/// Message header: tag (2B) + version (2B) + flags (1B) + request id (4B), big-endian.
pub const MESSAGE_HEADER_SIZE: usize = 9;

/// Handshake opener.
pub const HELLO: u16 = 0;
/// Handshake answer.
pub const HELLO_ACK: u16 = 1;
/// Liveness probe; answered with [`PONG`].
pub const PING: u16 = 2;
pub const PONG: u16 = 3;
/// Ends the receiving dispatch loop gracefully.
pub const SHUTDOWN: u16 = 4;
/// Error reply carrying an [`ErrorBody`](crate::control::ErrorBody).
pub const ERROR: u16 = 5;
/// First tag available to applications. Tags below it are reserved.
pub const APPLICATION_BASE: u16 = 256;

/// Flag bit: the sender waits for a reply carrying the same request id.
pub const FLAG_REPLY_EXPECTED: u8 = 0x01;

/// Current message layout version.
pub const MESSAGE_VERSION: u16 = 1;

/// Human-readable name of a reserved tag.
pub fn tag_name(tag: u16) -> Option<&'static str> {
    match tag {
        HELLO => Some("HELLO"),
        HELLO_ACK => Some("HELLO_ACK"),
        PING => Some("PING"),
        PONG => Some("PONG"),
        SHUTDOWN => Some("SHUTDOWN"),
        ERROR => Some("ERROR"),
        _ => None,
    }
}

/// A typed, versioned unit carried in one frame payload.
///
/// Wire layout:
/// ```text
/// ┌───────────┬──────────────┬───────────┬──────────────────┬──────────┐
/// │ Tag (2B)  │ Version (2B) │ Flags (1B)│ Request ID (4B)  │ Body     │
/// └───────────┴──────────────┴───────────┴──────────────────┴──────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tag: u16,
    pub version: u16,
    pub flags: u8,
    pub request_id: u32,
    pub body: Bytes,
}

impl Message {
    /// A one-way message.
    pub fn new(tag: u16, body: impl Into<Bytes>) -> Self {
        Self {
            tag,
            version: MESSAGE_VERSION,
            flags: 0,
            request_id: 0,
            body: body.into(),
        }
    }

    /// A message the sender expects a reply to.
    pub fn request(tag: u16, request_id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            flags: FLAG_REPLY_EXPECTED,
            request_id,
            ..Self::new(tag, body)
        }
    }

    /// A one-way message with a JSON body.
    pub fn json<T: Serialize>(tag: u16, body: &T) -> Result<Self, MessageError> {
        Ok(Self::new(tag, serde_json::to_vec(body)?))
    }

    /// Build the reply to `self`, correlated by request id.
    pub fn reply(&self, tag: u16, body: impl Into<Bytes>) -> Self {
        Self {
            tag,
            version: self.version,
            flags: 0,
            request_id: self.request_id,
            body: body.into(),
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.flags & FLAG_REPLY_EXPECTED != 0
    }

    pub fn is_reserved(&self) -> bool {
        self.tag < APPLICATION_BASE
    }

    /// Parse the body as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Encode into a frame payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + self.body.len());
        buf.put_u16(self.tag);
        buf.put_u16(self.version);
        buf.put_u8(self.flags);
        buf.put_u32(self.request_id);
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Decode a frame payload. The body shares the payload's buffer.
    pub fn decode(mut payload: Bytes) -> Result<Self, MessageError> {
        if payload.len() < MESSAGE_HEADER_SIZE {
            return Err(MessageError::TooShort {
                len: payload.len(),
                header: MESSAGE_HEADER_SIZE,
            });
        }
        let tag = payload.get_u16();
        let version = payload.get_u16();
        let flags = payload.get_u8();
        let request_id = payload.get_u32();
        Ok(Self {
            tag,
            version,
            flags,
            request_id,
            body: payload,
        })
    }
}
