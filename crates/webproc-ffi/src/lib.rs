//! webproc-ffi: C-ABI exports for the web process entry points.
//!
//! The configuration calls return a [`WebprocResult`]; on failure the
//! message is available from [`webproc_last_error`] on the same thread.

mod args;
mod error;
mod types;

use std::os::raw::{c_char, c_int};
use std::panic::AssertUnwindSafe;
use std::path::Path;

use webproc_bootstrap::ConfigurationError;

pub use types::{
    WebprocResult, WEBPROC_ERR_INTERNAL, WEBPROC_ERR_INVALID_ARGUMENT, WEBPROC_ERR_IO,
    WEBPROC_ERR_NOT_A_DIRECTORY, WEBPROC_ERR_NOT_FOUND, WEBPROC_EXIT_CHANNEL_CONSTRUCTION,
    WEBPROC_EXIT_GRACEFUL, WEBPROC_EXIT_HANDSHAKE_FAILURE, WEBPROC_EXIT_INTERNAL,
    WEBPROC_EXIT_TRANSPORT_FAILURE, WEBPROC_OK,
};

fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            error::set_panic_error();
            on_panic
        }
    }
}

/// Shared body of the path-taking configuration calls.
///
/// # Safety
/// `path` must be null or point to a valid NUL-terminated C string.
unsafe fn configure_with(
    path: *const c_char,
    apply: fn(&Path) -> Result<(), ConfigurationError>,
) -> WebprocResult {
    ffi_boundary(WebprocResult::Internal, || {
        error::clear_error_state();
        // SAFETY: forwarded from the caller's contract.
        let Some(path) = (unsafe { args::required_path_arg(path, "path") }) else {
            return WebprocResult::InvalidArgument;
        };
        match apply(path) {
            Ok(()) => WebprocResult::Ok,
            Err(err) => error::map_configuration_error(&err),
        }
    })
}

/// Point the XDG cache at `path`.
///
/// # Safety
/// `path` must be null or point to a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn webproc_initialize_xdg(path: *const c_char) -> WebprocResult {
    // SAFETY: forwarded from this function's contract.
    unsafe { configure_with(path, |p| webproc_bootstrap::initialize_xdg(p)) }
}

/// Point font configuration at `path`.
///
/// # Safety
/// `path` must be null or point to a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn webproc_initialize_fontconfig(path: *const c_char) -> WebprocResult {
    // SAFETY: forwarded from this function's contract.
    unsafe { configure_with(path, |p| webproc_bootstrap::initialize_fontconfig(p)) }
}

/// Add `path` to the GIO extra modules search list.
///
/// # Safety
/// `path` must be null or point to a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn webproc_initialize_gio_extra_modules_path(
    path: *const c_char,
) -> WebprocResult {
    // SAFETY: forwarded from this function's contract.
    unsafe {
        configure_with(path, |p| {
            webproc_bootstrap::initialize_gio_extra_modules_path(p)
        })
    }
}

/// Run the web process over `fd1` (read) and `fd2` (write) and return its
/// exit status.
///
/// On a non-zero status the failure is available from [`webproc_last_error`].
///
/// # Safety
/// Both descriptors are taken over whatever the outcome. They must be open,
/// owned by nothing else, and never used by the caller again.
#[no_mangle]
pub unsafe extern "C" fn webproc_initialize_main(fd1: c_int, fd2: c_int) -> c_int {
    ffi_boundary(WEBPROC_EXIT_INTERNAL, || {
        error::clear_error_state();
        // SAFETY: forwarded from this function's contract.
        match unsafe { webproc_bootstrap::run_main(fd1, fd2) } {
            Ok(_) => WEBPROC_EXIT_GRACEFUL,
            Err(err) => error::map_bootstrap_error(&err),
        }
    })
}

#[no_mangle]
pub extern "C" fn webproc_last_error() -> *const c_char {
    ffi_boundary(std::ptr::null(), error::last_error_ptr)
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};

    use super::*;

    fn last_error() -> String {
        let ptr = webproc_last_error();
        assert!(!ptr.is_null());
        // SAFETY: webproc_last_error returns a pointer to a thread-local CString.
        unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
    }

    #[test]
    fn null_path_is_invalid_argument() {
        // SAFETY: null is explicitly allowed.
        let result = unsafe { webproc_initialize_fontconfig(std::ptr::null()) };
        assert_eq!(result, WebprocResult::InvalidArgument);
        assert!(last_error().contains("path cannot be null"));
    }

    #[test]
    fn missing_path_reports_not_found() {
        let path = CString::new("/definitely/not/here/gio-modules").unwrap();
        // SAFETY: `path` is a valid C string for the duration of the call.
        let result = unsafe { webproc_initialize_gio_extra_modules_path(path.as_ptr()) };
        assert_eq!(result, WebprocResult::NotFound);
        assert!(last_error().contains("does not exist"));
    }

    #[test]
    fn success_clears_last_error() {
        let dir = std::env::temp_dir().join(format!("webproc-ffi-xdg-{}", std::process::id()));
        let path = CString::new(dir.to_str().unwrap()).unwrap();

        // SAFETY: null is explicitly allowed.
        let _ = unsafe { webproc_initialize_xdg(std::ptr::null()) };
        assert!(!last_error().is_empty());

        // SAFETY: `path` is a valid C string for the duration of the call.
        let result = unsafe { webproc_initialize_xdg(path.as_ptr()) };
        assert_eq!(result, WebprocResult::Ok);
        assert!(last_error().is_empty());
        assert!(dir.is_dir());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn exit_constants_match_bootstrap() {
        use webproc_bootstrap::ExitStatus;

        assert_eq!(WEBPROC_EXIT_GRACEFUL, ExitStatus::Graceful.code());
        assert_eq!(WEBPROC_EXIT_TRANSPORT_FAILURE, ExitStatus::TransportFailure.code());
        assert_eq!(WEBPROC_EXIT_HANDSHAKE_FAILURE, ExitStatus::HandshakeFailure.code());
        assert_eq!(WEBPROC_EXIT_CHANNEL_CONSTRUCTION, ExitStatus::ChannelConstruction.code());
        assert_eq!(WEBPROC_EXIT_INTERNAL, ExitStatus::Internal.code());
    }

    #[test]
    fn main_with_bad_descriptors_reports_construction_failure() {
        // SAFETY: -1 is never a valid descriptor; nothing is taken over.
        let status = unsafe { webproc_initialize_main(-1, -1) };
        assert_eq!(status, WEBPROC_EXIT_CHANNEL_CONSTRUCTION);
        assert!(last_error().contains("cannot build channel"));
    }
}
