//! Raw descriptor helpers built on `libc`.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::Instant;

/// Returns true if `fd` names an open descriptor in this process.
pub fn is_open(fd: RawFd) -> bool {
    if fd < 0 {
        return false;
    }
    // SAFETY: F_GETFD only inspects the descriptor table entry.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Allow or forbid `fd` to survive `exec` into a child process.
///
/// The host side clears close-on-exec on the descriptor it hands to the child;
/// the child sets it again once it owns the descriptor.
pub fn set_inheritable(fd: BorrowedFd<'_>, inheritable: bool) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is borrowed from a live descriptor for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let updated = if inheritable {
        flags & !libc::FD_CLOEXEC
    } else {
        flags | libc::FD_CLOEXEC
    };
    if updated != flags {
        // SAFETY: as above.
        let rc = unsafe { libc::fcntl(raw, libc::F_SETFD, updated) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>, nonblocking: bool) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is borrowed from a live descriptor for the duration of the call.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let updated = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if updated != flags {
        // SAFETY: as above.
        let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, updated) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub(crate) fn is_socket(fd: BorrowedFd<'_>) -> io::Result<bool> {
    // SAFETY: `stat` is plain old data; zeroed is a valid bit pattern.
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `stat` is a valid writable pointer and the descriptor is live.
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.st_mode & libc::S_IFMT == libc::S_IFSOCK)
}

/// Shut down both directions of a socket so the peer observes EOF even while
/// another descriptor for the same socket is still open here.
pub(crate) fn shutdown_socket(fd: BorrowedFd<'_>) {
    // SAFETY: the descriptor is live; failure (e.g. ENOTCONN) is harmless here.
    let _ = unsafe { libc::shutdown(fd.as_raw_fd(), libc::SHUT_RDWR) };
}

/// What woke a [`wait_ready`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// The descriptor is ready (or reports hang-up/error; the next I/O call surfaces it).
    Ready,
    /// The wake signal fired.
    Woken,
    /// Interrupted by a signal; the caller retries.
    Interrupted,
}

/// Block until `fd` reports `events`, the wake descriptor becomes readable,
/// or `deadline` passes (`TimedOut`).
pub(crate) fn wait_ready(
    fd: BorrowedFd<'_>,
    events: libc::c_short,
    wake: BorrowedFd<'_>,
    deadline: Option<Instant>,
) -> io::Result<Readiness> {
    let timeout_ms = match deadline {
        None => -1,
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            // Round up so a sub-millisecond remainder still waits.
            let ms = remaining.as_millis().saturating_add(1);
            libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
        }
    };

    let mut fds = [
        libc::pollfd {
            fd: fd.as_raw_fd(),
            events,
            revents: 0,
        },
        libc::pollfd {
            fd: wake.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    // SAFETY: `fds` is a valid array of two pollfd entries for the call duration.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if rc == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::Interrupted);
        }
        return Err(err);
    }
    if rc == 0 {
        return Err(io::Error::from(io::ErrorKind::TimedOut));
    }
    if fds[1].revents != 0 {
        return Ok(Readiness::Woken);
    }
    Ok(Readiness::Ready)
}
