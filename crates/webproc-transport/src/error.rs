use std::os::fd::RawFd;

/// Errors that can occur while taking ownership of or driving descriptors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A supplied descriptor is not open in this process.
    #[error("invalid descriptor {fd}: {source}")]
    InvalidDescriptor { fd: RawFd, source: std::io::Error },

    /// Failed to configure a descriptor (non-blocking mode, close-on-exec).
    #[error("failed to configure descriptor {fd}: {source}")]
    Configure { fd: RawFd, source: std::io::Error },

    /// An I/O error occurred on the endpoint.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
