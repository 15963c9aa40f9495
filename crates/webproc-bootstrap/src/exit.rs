/// Process exit statuses. The parent tells failure categories apart by these
/// alone, without reading logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitStatus {
    /// The peer closed the channel or asked for shutdown.
    Graceful = 0,
    /// The channel failed after the handshake.
    TransportFailure = 3,
    HandshakeFailure = 4,
    /// The supplied descriptors were unusable.
    ChannelConstruction = 5,
    /// Bad command-line usage.
    Usage = 64,
    Internal = 125,
}

impl ExitStatus {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        [
            Self::Graceful,
            Self::TransportFailure,
            Self::HandshakeFailure,
            Self::ChannelConstruction,
            Self::Usage,
            Self::Internal,
        ]
        .into_iter()
        .find(|status| status.code() == code)
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Graceful => "graceful shutdown",
            Self::TransportFailure => "transport failure",
            Self::HandshakeFailure => "handshake failure",
            Self::ChannelConstruction => "channel construction failure",
            Self::Usage => "usage error",
            Self::Internal => "internal error",
        }
    }
}

impl From<ExitStatus> for i32 {
    fn from(status: ExitStatus) -> Self {
        status.code()
    }
}
