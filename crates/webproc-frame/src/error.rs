/// Errors surfaced by the framed channel.
///
/// Every variant is fatal to the channel; callers decide whether to terminate.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer shut down its write side, or the channel was closed locally.
    #[error("channel closed")]
    Closed,

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// A frame declared or carried more bytes than the configured ceiling.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Any other I/O failure on the underlying descriptors.
    #[error("channel I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// True if this error is a read/write timeout rather than a channel failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
