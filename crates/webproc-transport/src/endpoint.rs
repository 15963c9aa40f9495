use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::fd;

/// Timeouts applied to the blocking halves of an endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    /// Maximum time a single `read` waits for data. `None` waits indefinitely.
    pub read_timeout: Option<Duration>,
    /// Maximum time a single `write` waits for the peer to drain. `None` waits indefinitely.
    pub write_timeout: Option<Duration>,
}

/// State shared by both halves: the closed latch and the wake signal.
struct Shared {
    closed: AtomicBool,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
    socket: bool,
}

impl Shared {
    fn new(socket: bool) -> Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;
        Ok(Self {
            closed: AtomicBool::new(false),
            wake_rx,
            wake_tx,
            socket,
        })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Latch the closed state. Returns false if it was already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        // The byte is never drained, so the wake descriptor stays readable and
        // every later poll observes it too.
        let _ = (&self.wake_tx).write(&[1]);
        true
    }
}

fn closed_error() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "endpoint closed")
}

/// Exclusive owner of the descriptor pair handed over by the parent process.
///
/// Both descriptors are released when the endpoint (or both of its halves)
/// is dropped, or earlier through [`ChannelEndpoint::close`].
pub struct ChannelEndpoint {
    read: ReadHalf,
    write: WriteHalf,
}

impl ChannelEndpoint {
    /// Take ownership of two raw descriptors supplied by the parent process.
    ///
    /// Equal descriptor numbers denote a single bidirectional socket. Ownership
    /// transfers unconditionally: if either descriptor is invalid, any valid one
    /// is closed before the error is returned.
    ///
    /// # Safety
    /// Each valid descriptor must be open and not owned by anything else in this
    /// process; the caller must not use or close it afterwards.
    pub unsafe fn from_raw_fds(read_fd: RawFd, write_fd: RawFd) -> Result<Self> {
        Self::from_raw_fds_with_config(read_fd, write_fd, EndpointConfig::default())
    }

    /// Same as [`ChannelEndpoint::from_raw_fds`] with explicit timeouts.
    ///
    /// # Safety
    /// See [`ChannelEndpoint::from_raw_fds`].
    pub unsafe fn from_raw_fds_with_config(
        read_fd: RawFd,
        write_fd: RawFd,
        config: EndpointConfig,
    ) -> Result<Self> {
        let read_open = fd::is_open(read_fd);
        let write_open = fd::is_open(write_fd);

        if !read_open || !write_open {
            if read_open {
                // SAFETY: caller transferred ownership of this open descriptor.
                drop(unsafe { OwnedFd::from_raw_fd(read_fd) });
            }
            if write_open && write_fd != read_fd {
                // SAFETY: as above.
                drop(unsafe { OwnedFd::from_raw_fd(write_fd) });
            }
            let bad = if read_open { write_fd } else { read_fd };
            return Err(TransportError::InvalidDescriptor {
                fd: bad,
                source: io::Error::from_raw_os_error(libc::EBADF),
            });
        }

        // SAFETY: validated open above; caller transferred ownership.
        let read = unsafe { OwnedFd::from_raw_fd(read_fd) };
        let write = if write_fd == read_fd {
            read.try_clone()?
        } else {
            // SAFETY: validated open above; caller transferred ownership.
            unsafe { OwnedFd::from_raw_fd(write_fd) }
        };

        Self::from_owned_with_config(read, write, config)
    }

    /// Build an endpoint over a connected bidirectional socket.
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        Self::from_stream_with_config(stream, EndpointConfig::default())
    }

    /// Build an endpoint over a connected bidirectional socket with explicit timeouts.
    pub fn from_stream_with_config(stream: UnixStream, config: EndpointConfig) -> Result<Self> {
        let read = OwnedFd::from(stream);
        let write = read.try_clone()?;
        Self::from_owned_with_config(read, write, config)
    }

    /// Build an endpoint over an independent read descriptor and write descriptor.
    pub fn from_owned(read: OwnedFd, write: OwnedFd) -> Result<Self> {
        Self::from_owned_with_config(read, write, EndpointConfig::default())
    }

    /// Build an endpoint over owned descriptors with explicit timeouts.
    pub fn from_owned_with_config(
        read: OwnedFd,
        write: OwnedFd,
        config: EndpointConfig,
    ) -> Result<Self> {
        for owned in [&read, &write] {
            let raw = owned.as_raw_fd();
            fd::set_nonblocking(owned.as_fd(), true)
                .and_then(|()| fd::set_inheritable(owned.as_fd(), false))
                .map_err(|source| TransportError::Configure { fd: raw, source })?;
        }

        let socket = fd::is_socket(read.as_fd())?;
        let shared = Arc::new(Shared::new(socket)?);

        debug!(
            read_fd = read.as_raw_fd(),
            write_fd = write.as_raw_fd(),
            socket,
            "channel endpoint acquired"
        );

        Ok(Self {
            read: ReadHalf {
                file: Some(File::from(read)),
                shared: Arc::clone(&shared),
                timeout: config.read_timeout,
            },
            write: WriteHalf {
                file: Some(File::from(write)),
                shared,
                timeout: config.write_timeout,
            },
        })
    }

    /// Split into independently usable halves.
    pub fn split(self) -> (ReadHalf, WriteHalf) {
        (self.read, self.write)
    }

    /// A handle that can close this endpoint from any thread.
    pub fn closer(&self) -> EndpointCloser {
        EndpointCloser {
            shared: Arc::clone(&self.read.shared),
        }
    }

    /// Close the endpoint, releasing both descriptors. Idempotent.
    pub fn close(&mut self) {
        self.read.shared.close();
        self.write.release();
        self.read.release();
    }

    /// Whether the endpoint has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.read.shared.is_closed()
    }
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("socket", &self.read.shared.socket)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Cloneable handle that latches an endpoint closed and wakes blocked I/O.
#[derive(Clone)]
pub struct EndpointCloser {
    shared: Arc<Shared>,
}

impl EndpointCloser {
    /// Latch closed and wake any blocked read or write.
    ///
    /// Returns false if the endpoint was already closed. Descriptors are
    /// released by the halves once they observe the closed state.
    pub fn close(&self) -> bool {
        self.shared.close()
    }

    /// Whether the endpoint has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for EndpointCloser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCloser")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read side of a [`ChannelEndpoint`].
///
/// Reads block until data arrives, the peer hangs up (`Ok(0)`), the read
/// timeout elapses (`TimedOut`), or the endpoint is closed locally
/// (`NotConnected`).
pub struct ReadHalf {
    file: Option<File>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl ReadHalf {
    /// Set the per-read timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Current per-read timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the endpoint has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Drop the read descriptor now. Later reads fail with `NotConnected`.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            trace!(fd = file.as_raw_fd(), "releasing read descriptor");
        }
    }
}

impl Read for ReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if self.shared.is_closed() {
                self.release();
                return Err(closed_error());
            }
            let Some(file) = self.file.as_mut() else {
                return Err(closed_error());
            };

            match file.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    // Woken and interrupted both loop back to the closed check.
                    let readiness = fd::wait_ready(
                        file.as_fd(),
                        libc::POLLIN,
                        self.shared.wake_rx.as_fd(),
                        deadline,
                    )?;
                    trace!(?readiness, "descriptor wait finished");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for ReadHalf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHalf")
            .field("fd", &self.file.as_ref().map(AsRawFd::as_raw_fd))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Write side of a [`ChannelEndpoint`].
///
/// A write blocks while the peer is not draining (back-pressure) until space
/// frees up, the write timeout elapses (`TimedOut`), or the endpoint is closed
/// locally (`NotConnected`).
pub struct WriteHalf {
    file: Option<File>,
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl WriteHalf {
    /// Set the per-write timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Current per-write timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether the endpoint has been closed locally.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Drop the write descriptor now so the peer observes end-of-stream.
    ///
    /// Sockets are shut down in both directions first, which also reaches the
    /// peer when the read half still holds a duplicate of the socket.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if self.shared.socket {
                fd::shutdown_socket(file.as_fd());
            }
            trace!(fd = file.as_raw_fd(), "releasing write descriptor");
        }
    }
}

impl Write for WriteHalf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if self.shared.is_closed() {
                self.release();
                return Err(closed_error());
            }
            let Some(file) = self.file.as_mut() else {
                return Err(closed_error());
            };

            match file.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    // Woken and interrupted both loop back to the closed check.
                    let readiness = fd::wait_ready(
                        file.as_fd(),
                        libc::POLLOUT,
                        self.shared.wake_rx.as_fd(),
                        deadline,
                    )?;
                    trace!(?readiness, "descriptor wait finished");
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            return Err(closed_error());
        }
        Ok(())
    }
}

impl Drop for WriteHalf {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for WriteHalf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHalf")
            .field("fd", &self.file.as_ref().map(AsRawFd::as_raw_fd))
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::IntoRawFd;
    use std::thread;

    use super::*;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        // SAFETY: `fds` is a valid two-element array.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        // SAFETY: pipe() returned two fresh descriptors we now own.
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn bidirectional_socket_roundtrip() {
        let (left, right) = UnixStream::pair().unwrap();
        let (mut left_read, mut left_write) = ChannelEndpoint::from_stream(left).unwrap().split();
        let (mut right_read, mut right_write) =
            ChannelEndpoint::from_stream(right).unwrap().split();

        left_write.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right_read.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right_write.write_all(b"pong").unwrap();
        left_read.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn split_pipes_roundtrip() {
        // Parent -> child and child -> parent pipes.
        let (child_read, parent_write) = pipe();
        let (parent_read, child_write) = pipe();

        let (mut child_rx, mut child_tx) = ChannelEndpoint::from_owned(child_read, child_write)
            .unwrap()
            .split();
        let mut parent_tx = File::from(parent_write);
        let mut parent_rx = File::from(parent_read);

        parent_tx.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        child_rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        child_tx.write_all(b"world").unwrap();
        parent_rx.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn from_raw_fds_same_descriptor_is_bidirectional() {
        let (left, right) = UnixStream::pair().unwrap();
        let raw = left.into_raw_fd();

        // SAFETY: `raw` was just released from `left` and is owned by nobody else.
        let endpoint = unsafe { ChannelEndpoint::from_raw_fds(raw, raw) }.unwrap();
        let (mut read, mut write) = endpoint.split();

        write.write_all(b"x").unwrap();
        let mut peer = right;
        let mut buf = [0u8; 1];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"x");

        peer.write_all(b"y").unwrap();
        read.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"y");
    }

    #[test]
    fn from_raw_fds_rejects_invalid_and_closes_valid() {
        let (left, _right) = UnixStream::pair().unwrap();
        let raw = left.into_raw_fd();

        // SAFETY: `raw` is owned by nobody else; -1 is never valid.
        let err = unsafe { ChannelEndpoint::from_raw_fds(raw, -1) }.unwrap_err();
        assert!(matches!(err, TransportError::InvalidDescriptor { fd: -1, .. }));
        assert!(!fd::is_open(raw), "valid descriptor must be released on failure");
    }

    #[test]
    fn read_returns_zero_on_peer_hangup() {
        let (left, right) = UnixStream::pair().unwrap();
        let (mut read, _write) = ChannelEndpoint::from_stream(left).unwrap().split();
        drop(right);

        let mut buf = [0u8; 8];
        assert_eq!(read.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn read_timeout_elapses() {
        let (left, _right) = UnixStream::pair().unwrap();
        let config = EndpointConfig {
            read_timeout: Some(Duration::from_millis(20)),
            ..EndpointConfig::default()
        };
        let (mut read, _write) = ChannelEndpoint::from_stream_with_config(left, config)
            .unwrap()
            .split();

        let mut buf = [0u8; 8];
        let err = read.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn close_wakes_blocked_reader() {
        let (left, _right) = UnixStream::pair().unwrap();
        let endpoint = ChannelEndpoint::from_stream(left).unwrap();
        let closer = endpoint.closer();
        let (mut read, _write) = endpoint.split();

        let reader = thread::spawn(move || {
            let mut buf = [0u8; 8];
            read.read(&mut buf).unwrap_err().kind()
        });

        thread::sleep(Duration::from_millis(50));
        assert!(closer.close());
        assert_eq!(reader.join().unwrap(), ErrorKind::NotConnected);
    }

    #[test]
    fn close_is_idempotent() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut endpoint = ChannelEndpoint::from_stream(left).unwrap();
        let closer = endpoint.closer();

        endpoint.close();
        endpoint.close();
        assert!(!closer.close());
        assert!(endpoint.is_closed());
    }

    #[test]
    fn close_signals_eof_to_peer() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut endpoint = ChannelEndpoint::from_stream(left).unwrap();
        endpoint.close();

        let mut buf = [0u8; 1];
        assert_eq!(right.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_blocks_until_timeout_without_reader() {
        let (left, _right) = UnixStream::pair().unwrap();
        let config = EndpointConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..EndpointConfig::default()
        };
        let (_read, mut write) = ChannelEndpoint::from_stream_with_config(left, config)
            .unwrap()
            .split();

        let chunk = vec![0u8; 64 * 1024];
        let err = loop {
            if let Err(err) = write.write(&chunk) {
                break err;
            }
        };
        assert_eq!(err.kind(), ErrorKind::TimedOut);
    }
}
