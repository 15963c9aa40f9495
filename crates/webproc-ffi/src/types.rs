/// Result codes returned by the configuration entry points.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebprocResult {
    Ok = 0,
    InvalidArgument = 1,
    NotFound = 2,
    NotADirectory = 3,
    Io = 4,
    Internal = 99,
}

pub const WEBPROC_OK: WebprocResult = WebprocResult::Ok;
pub const WEBPROC_ERR_INVALID_ARGUMENT: WebprocResult = WebprocResult::InvalidArgument;
pub const WEBPROC_ERR_NOT_FOUND: WebprocResult = WebprocResult::NotFound;
pub const WEBPROC_ERR_NOT_A_DIRECTORY: WebprocResult = WebprocResult::NotADirectory;
pub const WEBPROC_ERR_IO: WebprocResult = WebprocResult::Io;
pub const WEBPROC_ERR_INTERNAL: WebprocResult = WebprocResult::Internal;

/// Exit statuses returned by `webproc_initialize_main`.
pub const WEBPROC_EXIT_GRACEFUL: i32 = 0;
pub const WEBPROC_EXIT_TRANSPORT_FAILURE: i32 = 3;
pub const WEBPROC_EXIT_HANDSHAKE_FAILURE: i32 = 4;
pub const WEBPROC_EXIT_CHANNEL_CONSTRUCTION: i32 = 5;
pub const WEBPROC_EXIT_INTERNAL: i32 = 125;
