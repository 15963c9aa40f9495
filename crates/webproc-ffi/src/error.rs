use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use webproc_bootstrap::{BootstrapError, ConfigurationError};

use crate::types::WebprocResult;

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear_error_state() {
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::default();
    });
}

pub(crate) fn set_error_message(message: impl Into<String>) {
    let sanitized = message.into().replace('\0', "?");
    LAST_ERROR.with(|state| {
        *state.borrow_mut() = CString::new(sanitized).unwrap_or_default();
    });
}

pub(crate) fn set_invalid_argument(message: impl Into<String>) -> WebprocResult {
    set_error_message(message);
    WebprocResult::InvalidArgument
}

pub(crate) fn set_panic_error() {
    set_error_message("panic across FFI boundary");
}

pub(crate) fn map_configuration_error(err: &ConfigurationError) -> WebprocResult {
    set_error_message(err.to_string());
    match err {
        ConfigurationError::EmptyPath { .. } | ConfigurationError::InvalidPath { .. } => {
            WebprocResult::InvalidArgument
        }
        ConfigurationError::NotFound { .. } => WebprocResult::NotFound,
        ConfigurationError::NotADirectory { .. } => WebprocResult::NotADirectory,
        ConfigurationError::Io { .. } => WebprocResult::Io,
    }
}

/// Record `err` as the last error and return the exit status it maps to.
pub(crate) fn map_bootstrap_error(err: &BootstrapError) -> c_int {
    set_error_message(err.to_string());
    err.exit_status().code()
}

pub(crate) fn last_error_ptr() -> *const c_char {
    LAST_ERROR.with(|state| state.borrow().as_ptr())
}
