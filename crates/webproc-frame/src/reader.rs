use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, truncated, Frame, FrameConfig};
use crate::error::{ChannelError, Result};

const READ_CHUNK: usize = 8 * 1024;

/// Pulls whole frames out of a byte stream.
///
/// Bytes that arrive ahead of a frame boundary stay pending between calls, so
/// a read that timed out can simply be retried. The pending buffer grows by
/// what the stream delivered, never by what a header claims.
pub struct FrameReader<R> {
    stream: R,
    pending: BytesMut,
    max_frame_size: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(stream: R) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    pub fn with_config(stream: R, config: FrameConfig) -> Self {
        Self {
            stream,
            pending: BytesMut::with_capacity(READ_CHUNK),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Block until the next frame is complete.
    ///
    /// End of stream on a frame boundary is [`ChannelError::Closed`]; inside a
    /// frame it is [`ChannelError::Truncated`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        self.read_frame_with(|_| Ok(()))
    }

    /// [`read_frame`](Self::read_frame), calling `before_read` ahead of every
    /// read from the stream.
    ///
    /// `before_read` may re-arm the stream (a shrinking timeout, say). An error
    /// from it ends the call with the pending bytes kept for the next one.
    pub fn read_frame_with<F>(&mut self, mut before_read: F) -> Result<Frame>
    where
        F: FnMut(&mut R) -> Result<()>,
    {
        loop {
            if let Some(frame) = decode_frame(&mut self.pending, self.max_frame_size)? {
                return Ok(frame);
            }
            before_read(&mut self.stream)?;
            if self.fill()? == 0 {
                return Err(if self.pending.is_empty() {
                    ChannelError::Closed
                } else {
                    truncated(&self.pending)
                });
            }
        }
    }

    /// One successful read appended to the pending bytes.
    fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(read) => {
                    self.pending.extend_from_slice(&chunk[..read]);
                    return Ok(read);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
    }

    pub fn stream(&self) -> &R {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut R {
        &mut self.stream
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Applies from the next header decoded.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Cursor};
    use std::os::unix::net::UnixStream;
    use std::thread;

    use bytes::BufMut;

    use super::*;
    use crate::codec::{encode_frame, DEFAULT_MAX_FRAME_SIZE};
    use crate::writer::FrameWriter;

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, DEFAULT_MAX_FRAME_SIZE, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    /// Replays a fixed sequence of read results, then reports end of stream.
    struct Script(VecDeque<io::Result<Vec<u8>>>);

    impl Script {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self(steps.into())
        }

        fn trickle(bytes: &[u8]) -> Self {
            Self(bytes.iter().map(|b| Ok(vec![*b])).collect())
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.0.push_front(Ok(bytes.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    #[test]
    fn frames_in_order_then_closed() {
        let mut reader = FrameReader::new(Cursor::new(wire(&[b"one", b"", b"three"])));

        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"one");
        assert!(reader.read_frame().unwrap().is_empty());
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"three");
        assert!(matches!(reader.read_frame(), Err(ChannelError::Closed)));
    }

    #[test]
    fn payload_larger_than_one_read() {
        let payload = vec![0xAB; 3 * READ_CHUNK + 17];
        let mut reader = FrameReader::new(Cursor::new(wire(&[&payload])));
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn one_byte_at_a_time() {
        let mut reader = FrameReader::new(Script::trickle(&wire(&[b"slow", b"er"])));
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"slow");
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"er");
    }

    #[test]
    fn end_of_stream_inside_payload() {
        let mut partial = BytesMut::new();
        partial.put_u32(100);
        partial.put_slice(&[7u8; 10]);

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(ChannelError::Truncated {
                expected: 104,
                received: 14
            })
        ));
    }

    #[test]
    fn end_of_stream_inside_header() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8, 0]));
        assert!(matches!(
            reader.read_frame(),
            Err(ChannelError::Truncated { received: 2, .. })
        ));
    }

    #[test]
    fn oversized_header_rejected_before_payload_arrives() {
        let config = FrameConfig {
            max_frame_size: 16,
            ..FrameConfig::default()
        };
        let mut reader =
            FrameReader::with_config(Cursor::new(1024u32.to_be_bytes().to_vec()), config);

        assert!(matches!(
            reader.read_frame(),
            Err(ChannelError::FrameTooLarge {
                size: 1024,
                max: 16
            })
        ));
        assert_eq!(reader.pending(), 4);
    }

    #[test]
    fn timeout_keeps_partial_frame() {
        let bytes = wire(&[b"resume"]);
        let mut reader = FrameReader::new(Script::new(vec![
            Ok(bytes[..3].to_vec()),
            Err(ErrorKind::TimedOut.into()),
            Ok(bytes[3..].to_vec()),
        ]));

        assert!(reader.read_frame().unwrap_err().is_timeout());
        assert_eq!(reader.pending(), 3);
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"resume");
    }

    #[test]
    fn before_read_runs_per_read_and_can_abort() {
        let mut reader = FrameReader::new(Script::trickle(&wire(&[b"abc"])));
        let mut reads = 0;
        let err = reader
            .read_frame_with(|_| {
                reads += 1;
                if reads > 5 {
                    return Err(ChannelError::Io(ErrorKind::TimedOut.into()));
                }
                Ok(())
            })
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(reader.pending(), 5);
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"abc");
    }

    #[test]
    fn interrupted_read_is_retried() {
        let mut reader = FrameReader::new(Script::new(vec![
            Err(ErrorKind::Interrupted.into()),
            Ok(wire(&[b"ok"])),
        ]));
        assert_eq!(reader.read_frame().unwrap().payload.as_ref(), b"ok");
    }

    #[test]
    fn other_errors_surface_as_io() {
        let mut reader =
            FrameReader::new(Script::new(vec![Err(ErrorKind::ConnectionReset.into())]));
        assert!(matches!(
            reader.read_frame(),
            Err(ChannelError::Io(err)) if err.kind() == ErrorKind::ConnectionReset
        ));
    }

    #[test]
    fn writer_thread_over_socket_pair() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut reader = FrameReader::new(right);

        let writer = thread::spawn(move || {
            let mut writer = FrameWriter::new(left);
            for i in 0..64u16 {
                writer.send(format!("msg-{i}").as_bytes()).unwrap();
            }
        });

        for i in 0..64u16 {
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.payload.as_ref(), format!("msg-{i}").as_bytes());
        }
        writer.join().unwrap();
        assert!(matches!(reader.read_frame(), Err(ChannelError::Closed)));
    }
}
