use std::time::Duration;

use webproc_frame::ChannelError;

use crate::handshake::VersionRange;

/// A frame payload that could not be decoded into a [`Message`](crate::Message).
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Payload shorter than the fixed message header.
    #[error("message too short: {len} bytes (header is {header})")]
    TooShort { len: usize, header: usize },

    /// A JSON body failed to serialize or parse.
    #[error("invalid message body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handshake failures. All of them are fatal to the channel.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The advertised version ranges do not overlap.
    #[error("protocol version mismatch (local {local}, peer {peer})")]
    VersionMismatch { local: VersionRange, peer: VersionRange },

    /// The awaited handshake message did not arrive before the deadline.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The peer sent something other than the expected handshake message.
    #[error("handshake protocol violation: {0}")]
    Protocol(String),

    /// Local handshake configuration is unusable.
    #[error("invalid handshake configuration: {0}")]
    InvalidConfig(String),

    /// This handshake already ran; it is not restartable.
    #[error("handshake already completed")]
    AlreadyCompleted,

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("handshake channel failure: {0}")]
    Channel(#[from] ChannelError),
}

/// Failure returned by an application [`Handler`](crate::Handler).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    /// Short machine-readable code carried in the error reply.
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code("handler_failed", message)
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Per-message failures inside the dispatch loop. None of them is fatal.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no handler for message tag {0}")]
    UnknownMessage(u16),

    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),

    #[error("handler for tag {tag} failed: {source}")]
    Handler {
        tag: u16,
        #[source]
        source: HandlerError,
    },

    #[error("handler for tag {tag} panicked: {message}")]
    Panicked { tag: u16, message: String },
}

impl DispatchError {
    /// Code carried in an `ERROR` reply for this failure.
    pub fn code(&self) -> &str {
        match self {
            Self::UnknownMessage(_) => "unknown_message",
            Self::Malformed(_) => "malformed",
            Self::Handler { source, .. } => &source.code,
            Self::Panicked { .. } => "handler_panicked",
        }
    }
}
