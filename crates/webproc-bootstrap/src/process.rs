use std::sync::Once;

use tracing::debug;

static INIT: Once = Once::new();

/// Process-wide setup, performed once before the channel is first used.
///
/// Ignores `SIGPIPE` so a write to a hung-up peer fails with `EPIPE` instead
/// of killing the process. A Rust binary already does this at startup; a
/// host that loads this crate as a library may not have.
pub fn init_process() {
    INIT.call_once(|| {
        // SAFETY: installing SIG_IGN for SIGPIPE has no preconditions.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
        debug!("process initialized");
    });
}

/// Whether [`init_process`] has run.
pub fn is_initialized() -> bool {
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_once_and_is_observable() {
        init_process();
        init_process();
        assert!(is_initialized());
    }
}
