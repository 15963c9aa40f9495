use std::path::PathBuf;

use webproc_frame::ChannelError;
use webproc_peer::HandshakeError;
use webproc_transport::TransportError;

use crate::exit::ExitStatus;

/// A one-shot environment setup step could not be applied.
///
/// Never fatal: the configured subsystem falls back to its default search paths.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("{step}: empty path")]
    EmptyPath { step: &'static str },

    #[error("{step}: {} does not exist", .path.display())]
    NotFound { step: &'static str, path: PathBuf },

    #[error("{step}: {} is not a directory", .path.display())]
    NotADirectory { step: &'static str, path: PathBuf },

    /// The path cannot be stored in a colon-separated search list.
    #[error("{step}: {} contains ':'", .path.display())]
    InvalidPath { step: &'static str, path: PathBuf },

    #[error("{step}: {}: {source}", .path.display())]
    Io {
        step: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal startup and runtime failures, one per exit status.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The supplied descriptors could not become a channel.
    #[error("cannot build channel: {0}")]
    ChannelConstruction(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The channel failed while the dispatch loop was running.
    #[error("transport failure: {0}")]
    Transport(#[from] ChannelError),

    /// A bug, such as a panic outside any handler.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BootstrapError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::ChannelConstruction(_) => ExitStatus::ChannelConstruction,
            Self::Handshake(_) => ExitStatus::HandshakeFailure,
            Self::Transport(_) => ExitStatus::TransportFailure,
            Self::Internal(_) => ExitStatus::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;
