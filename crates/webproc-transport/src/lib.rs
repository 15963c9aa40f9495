//! Descriptor-level transport for a spawned web process.
//!
//! The parent process hands the child one or two already-open descriptors.
//! This crate takes ownership of them and exposes a read half and a write half
//! with blocking semantics that a local `close()` can interrupt:
//! - one bidirectional socket (both descriptor numbers equal), or
//! - a split pair of independent read/write endpoints (pipes or sockets).
//!
//! This is the lowest layer of webproc. Framing lives in `webproc-frame`.

pub mod endpoint;
pub mod error;
pub mod fd;

pub use endpoint::{ChannelEndpoint, EndpointCloser, EndpointConfig, ReadHalf, WriteHalf};
pub use error::{Result, TransportError};
pub use fd::set_inheritable;
