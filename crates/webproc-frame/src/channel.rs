use std::io::ErrorKind;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};
use webproc_transport::{ChannelEndpoint, EndpointCloser, ReadHalf, WriteHalf};

use crate::codec::FrameConfig;
use crate::error::{ChannelError, Result};
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// A framed, bidirectional message channel over a [`ChannelEndpoint`].
///
/// `Channel` is `Sync`: any number of threads may call [`Channel::send`];
/// frames are serialized by a single write lock and never interleave.
/// One receiver at a time holds the read lock.
///
/// Read timeouts bound a whole frame, not a single read: a peer trickling
/// bytes cannot stretch a receive past its deadline.
pub struct Channel {
    reader: Mutex<FrameReader<ReadHalf>>,
    writer: Mutex<FrameWriter<WriteHalf>>,
    closer: EndpointCloser,
    read_timeout: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Channel {
    /// Wrap an endpoint with default configuration.
    pub fn new(endpoint: ChannelEndpoint) -> Self {
        Self::with_config(endpoint, FrameConfig::default())
    }

    /// Wrap an endpoint, applying frame ceiling and timeouts from `config`.
    pub fn with_config(endpoint: ChannelEndpoint, config: FrameConfig) -> Self {
        let closer = endpoint.closer();
        let (read, mut write) = endpoint.split();
        write.set_timeout(config.write_timeout);

        Self {
            reader: Mutex::new(FrameReader::with_config(read, config.clone())),
            writer: Mutex::new(FrameWriter::with_config(write, config.clone())),
            closer,
            read_timeout: config.read_timeout,
        }
    }

    /// Send one payload as a frame.
    ///
    /// Blocks while the peer is not draining. Concurrent senders are
    /// serialized; a frame is always written whole or the channel is closed.
    ///
    /// Every send error is fatal, a write timeout included: part of the frame
    /// may already be on the wire and the stream cannot be resynchronized.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        if self.closer.is_closed() {
            return Err(ChannelError::Closed);
        }
        let result = lock(&self.writer).send(payload);
        match result {
            Ok(()) => {
                trace!(size = payload.len(), "frame sent");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Receive the next frame payload, blocking until one is complete.
    ///
    /// Returns `ChannelError::Closed` once the peer has shut down its write side
    /// or the channel was closed locally.
    pub fn receive(&self) -> Result<Bytes> {
        self.receive_until(self.read_timeout.map(|timeout| Instant::now() + timeout))
    }

    /// Receive with a one-off timeout that overrides the configured read timeout.
    ///
    /// A timeout surfaces as `ChannelError::Io` with kind `TimedOut`
    /// (see [`ChannelError::is_timeout`]) and leaves the channel usable.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Bytes> {
        self.receive_until(Some(Instant::now() + timeout))
    }

    /// Receive a frame that must be complete by `deadline`.
    ///
    /// Each read waits only for the time left. Bytes of an unfinished frame
    /// stay pending, so a timed-out channel remains usable.
    pub fn receive_deadline(&self, deadline: Instant) -> Result<Bytes> {
        self.receive_until(Some(deadline))
    }

    fn receive_until(&self, deadline: Option<Instant>) -> Result<Bytes> {
        if self.closer.is_closed() {
            return Err(ChannelError::Closed);
        }

        let result = {
            let mut reader = lock(&self.reader);
            let result = reader.read_frame_with(|stream| {
                let remaining = match deadline {
                    None => None,
                    Some(deadline) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        if left.is_zero() {
                            return Err(ChannelError::Io(ErrorKind::TimedOut.into()));
                        }
                        Some(left)
                    }
                };
                stream.set_timeout(remaining);
                Ok(())
            });
            if self.closer.is_closed() {
                reader.stream_mut().release();
            }
            result
        };

        match result {
            Ok(frame) => {
                trace!(size = frame.len(), "frame received");
                Ok(frame.into_payload())
            }
            Err(err) if err.is_timeout() => Err(err),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Translate a fatal failure and tear the channel down.
    fn fail(&self, err: ChannelError) -> ChannelError {
        let locally_closed = self.closer.is_closed();
        match err {
            ChannelError::Closed => {
                debug!("peer closed the channel");
                self.close();
                ChannelError::Closed
            }
            _ if locally_closed => ChannelError::Closed,
            other => {
                warn!(error = %other, "fatal channel error");
                self.close();
                other
            }
        }
    }

    /// Close the channel and release both descriptors. Idempotent.
    ///
    /// A receive blocked on another thread wakes and returns `ChannelError::Closed`.
    pub fn close(&self) {
        if !self.closer.close() {
            return;
        }
        debug!("closing channel");
        lock(&self.writer).stream_mut().release();
        // A blocked receiver holds the read lock; it releases the descriptor
        // itself once woken.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.stream_mut().release();
        }
    }

    /// Whether the channel has been closed (locally, or after a fatal error).
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Adjust the frame ceiling for both directions.
    pub fn set_max_frame_size(&self, max_frame_size: usize) {
        lock(&self.reader).set_max_frame_size(max_frame_size);
        lock(&self.writer).set_max_frame_size(max_frame_size);
    }

    /// Current frame ceiling for received frames.
    pub fn max_frame_size(&self) -> usize {
        lock(&self.reader).max_frame_size()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn pair() -> (Channel, Channel) {
        let (left, right) = UnixStream::pair().unwrap();
        (
            Channel::new(ChannelEndpoint::from_stream(left).unwrap()),
            Channel::new(ChannelEndpoint::from_stream(right).unwrap()),
        )
    }

    #[test]
    fn send_and_receive() {
        let (left, right) = pair();
        left.send(b"hello").unwrap();
        assert_eq!(right.receive().unwrap().as_ref(), b"hello");

        right.send(b"world").unwrap();
        assert_eq!(left.receive().unwrap().as_ref(), b"world");
    }

    #[test]
    fn close_is_observed_by_both_sides() {
        let (left, right) = pair();
        left.close();

        assert!(matches!(left.receive(), Err(ChannelError::Closed)));
        assert!(matches!(right.receive(), Err(ChannelError::Closed)));
        assert!(matches!(left.send(b"late"), Err(ChannelError::Closed)));
    }

    #[test]
    fn close_is_idempotent() {
        let (left, _right) = pair();
        left.close();
        left.close();
        left.close();
        assert!(left.is_closed());
        assert!(matches!(left.receive(), Err(ChannelError::Closed)));
    }

    #[test]
    fn close_wakes_blocked_receive() {
        let (left, _right) = pair();
        let left = Arc::new(left);

        let receiver = {
            let left = Arc::clone(&left);
            thread::spawn(move || left.receive())
        };

        thread::sleep(Duration::from_millis(50));
        left.close();

        assert!(matches!(
            receiver.join().unwrap(),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn truncated_stream_is_reported() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let channel = Channel::new(ChannelEndpoint::from_stream(left).unwrap());

        right.write_all(&100u32.to_be_bytes()).unwrap();
        right.write_all(&[0u8; 10]).unwrap();
        drop(right);

        assert!(matches!(
            channel.receive(),
            Err(ChannelError::Truncated { .. })
        ));
        // Fatal: the channel is torn down afterwards.
        assert!(channel.is_closed());
    }

    #[test]
    fn oversized_declared_length_rejected() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let config = FrameConfig {
            max_frame_size: 1024,
            ..FrameConfig::default()
        };
        let channel = Channel::with_config(ChannelEndpoint::from_stream(left).unwrap(), config);

        right.write_all(&(u32::MAX).to_be_bytes()).unwrap();

        assert!(matches!(
            channel.receive(),
            Err(ChannelError::FrameTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn receive_timeout_leaves_channel_usable() {
        let (left, right) = pair();

        let err = right.receive_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(err.is_timeout());
        assert!(!right.is_closed());

        left.send(b"after").unwrap();
        assert_eq!(right.receive().unwrap().as_ref(), b"after");
    }

    #[test]
    fn deadline_bounds_a_trickled_frame() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let channel = Channel::new(ChannelEndpoint::from_stream(left).unwrap());

        let mut bytes = 5u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"slow!");
        let trickler = thread::spawn(move || {
            for byte in bytes {
                right.write_all(&[byte]).unwrap();
                thread::sleep(Duration::from_millis(40));
            }
            right
        });

        let started = Instant::now();
        let err = channel
            .receive_deadline(started + Duration::from_millis(150))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(300));
        assert!(!channel.is_closed());

        // The bytes already taken stay pending for the next receive.
        let _right = trickler.join().unwrap();
        assert_eq!(channel.receive().unwrap().as_ref(), b"slow!");
    }

    #[test]
    fn configured_read_timeout_bounds_the_whole_frame() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let config = FrameConfig {
            read_timeout: Some(Duration::from_millis(100)),
            ..FrameConfig::default()
        };
        let channel = Channel::with_config(ChannelEndpoint::from_stream(left).unwrap(), config);

        let trickler = thread::spawn(move || {
            for byte in 64u32.to_be_bytes() {
                right.write_all(&[byte]).unwrap();
                thread::sleep(Duration::from_millis(60));
            }
            right
        });

        let started = Instant::now();
        assert!(channel.receive().unwrap_err().is_timeout());
        assert!(started.elapsed() < Duration::from_millis(200));
        let _right = trickler.join().unwrap();
    }

    #[test]
    fn send_timeout_mid_frame_closes_channel() {
        let (left, right) = UnixStream::pair().unwrap();
        let config = FrameConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let sender = Channel::with_config(ChannelEndpoint::from_stream(left).unwrap(), config);
        let receiver = Channel::new(ChannelEndpoint::from_stream(right).unwrap());

        // Far more than a socket buffer holds, with nobody reading.
        let err = sender.send(&vec![0x5A; 4 * 1024 * 1024]).unwrap_err();
        assert!(err.is_timeout());
        assert!(sender.is_closed());
        assert!(matches!(sender.send(b"ok"), Err(ChannelError::Closed)));

        // The peer sees the cut-off frame, never a desynchronized follow-up.
        assert!(matches!(
            receiver.receive(),
            Err(ChannelError::Truncated { .. })
        ));
    }

    #[test]
    fn concurrent_senders_never_interleave() {
        let (left, right) = pair();
        let left = Arc::new(left);
        let payload_len = 32 * 1024;

        let senders: Vec<_> = (0..4u8)
            .map(|id| {
                let left = Arc::clone(&left);
                thread::spawn(move || {
                    for _ in 0..16 {
                        left.send(&vec![id; payload_len]).unwrap();
                    }
                })
            })
            .collect();

        let receiver = thread::spawn(move || {
            for _ in 0..64 {
                let payload = right.receive().unwrap();
                assert_eq!(payload.len(), payload_len);
                let first = payload[0];
                assert!(payload.iter().all(|b| *b == first), "frame interleaved");
            }
        });

        for sender in senders {
            sender.join().unwrap();
        }
        receiver.join().unwrap();
    }

    #[test]
    fn order_is_preserved() {
        let (left, right) = pair();
        for i in 0..100u32 {
            left.send(&i.to_be_bytes()).unwrap();
        }
        for i in 0..100u32 {
            assert_eq!(right.receive().unwrap().as_ref(), &i.to_be_bytes());
        }
    }

    #[test]
    fn split_pipes_channel() {
        use std::os::fd::{FromRawFd, OwnedFd};

        fn pipe() -> (OwnedFd, OwnedFd) {
            let mut fds = [0; 2];
            // SAFETY: `fds` is a valid two-element array.
            assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
            // SAFETY: pipe() returned two fresh descriptors we now own.
            unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
        }

        let (a_read, b_write) = pipe();
        let (b_read, a_write) = pipe();
        let a = Channel::new(ChannelEndpoint::from_owned(a_read, a_write).unwrap());
        let b = Channel::new(ChannelEndpoint::from_owned(b_read, b_write).unwrap());

        a.send(b"over pipes").unwrap();
        assert_eq!(b.receive().unwrap().as_ref(), b"over pipes");

        b.close();
        assert!(matches!(a.receive(), Err(ChannelError::Closed)));
    }
}
