//! Messages, handshake and dispatch on top of a framed [`Channel`](webproc_frame::Channel).
//!
//! A [`Message`] is a typed, versioned unit carried in one frame. The
//! [`Handshake`] runs once per channel before anything else; afterwards a
//! [`DispatchLoop`] routes incoming messages through an immutable
//! [`DispatchTable`] until the peer hangs up or a shutdown is requested.

pub mod control;
pub mod dispatch;
pub mod error;
pub mod event_loop;
pub mod handshake;
pub mod message;

pub use control::{ErrorBody, Hello, HelloAck, ShutdownBody};
pub use dispatch::{handler_fn, DispatchTable, DispatchTableBuilder, Handler, Outcome};
pub use error::{DispatchError, HandlerError, HandshakeError, MessageError};
pub use event_loop::{
    DispatchConfig, DispatchLoop, DispatchMode, LoopExit, LoopStats, ShutdownHandle,
};
pub use handshake::{
    handshake, Handshake, HandshakeConfig, HandshakeResult, HandshakeState, Role, VersionRange,
    DEFAULT_MAX_HANDSHAKE_PAYLOAD, DEFAULT_PROTOCOL_NAME,
};
pub use message::{
    tag_name, Message, APPLICATION_BASE, ERROR, FLAG_REPLY_EXPECTED, HELLO, HELLO_ACK,
    MESSAGE_HEADER_SIZE, MESSAGE_VERSION, PING, PONG, SHUTDOWN,
};
