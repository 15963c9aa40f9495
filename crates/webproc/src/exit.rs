use std::fmt;
use std::io;

use webproc_bootstrap::{BootstrapError, ExitStatus};
use webproc_frame::ChannelError;
use webproc_peer::HandshakeError;
use webproc_transport::TransportError;

// Web process statuses first, then the CLI's own.
pub const SUCCESS: i32 = ExitStatus::Graceful.code();
pub const TRANSPORT_FAILURE: i32 = ExitStatus::TransportFailure.code();
pub const HANDSHAKE_FAILURE: i32 = ExitStatus::HandshakeFailure.code();
pub const CHANNEL_CONSTRUCTION: i32 = ExitStatus::ChannelConstruction.code();
pub const USAGE: i32 = ExitStatus::Usage.code();
pub const INTERNAL: i32 = ExitStatus::Internal.code();
/// The host could not start the child command.
pub const SPAWN_FAILED: i32 = 127;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => SPAWN_FAILED,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    CliError::new(CHANNEL_CONSTRUCTION, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    CliError::new(TRANSPORT_FAILURE, format!("{context}: {err}"))
}

pub fn handshake_error(context: &str, err: HandshakeError) -> CliError {
    CliError::new(HANDSHAKE_FAILURE, format!("{context}: {err}"))
}

pub fn bootstrap_error(err: &BootstrapError) -> CliError {
    CliError::new(err.exit_status().code(), err.to_string())
}
