use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, FrameConfig};
use crate::error::{ChannelError, Result};

/// Encodes payloads as frames onto a byte stream.
///
/// Each frame is staged in one buffer and written out completely before
/// [`send`](Self::send) returns. Exclusive access to the writer is what keeps
/// frames from interleaving.
pub struct FrameWriter<W> {
    stream: W,
    staging: BytesMut,
    max_frame_size: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    pub fn with_config(stream: W, config: FrameConfig) -> Self {
        Self {
            stream,
            staging: BytesMut::new(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Frame `payload` and write it out, blocking until the stream took all of it.
    ///
    /// An oversized payload is rejected before anything is written.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.staging.clear();
        encode_frame(payload, self.max_frame_size, &mut self.staging)?;
        write_fully(&mut self.stream, &self.staging)?;

        loop {
            match self.stream.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
    }

    pub fn stream(&self) -> &W {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut W {
        &mut self.stream
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }
}

fn write_fully(stream: &mut impl Write, mut bytes: &[u8]) -> Result<()> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(ChannelError::Io(ErrorKind::WriteZero.into())),
            Ok(written) => bytes = &bytes[written..],
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(ChannelError::Io(err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;

    use super::*;
    use crate::codec::{decode_frame, HEADER_SIZE};

    /// Accepts at most `chunk` bytes per write after replaying `faults`.
    struct Recorder {
        data: Vec<u8>,
        chunk: usize,
        faults: VecDeque<ErrorKind>,
        flushes: usize,
    }

    impl Recorder {
        fn new(chunk: usize, faults: &[ErrorKind]) -> Self {
            Self {
                data: Vec::new(),
                chunk,
                faults: faults.iter().copied().collect(),
                flushes: 0,
            }
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.faults.pop_front() {
                return Err(kind.into());
            }
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn header_is_big_endian_length() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.send(b"hello").unwrap();

        let wire = writer.stream();
        assert_eq!(&wire[..HEADER_SIZE], &[0, 0, 0, 5]);
        assert_eq!(&wire[HEADER_SIZE..], b"hello");
    }

    #[test]
    fn frames_are_written_back_to_back() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.send(b"one").unwrap();
        writer.send(b"").unwrap();
        writer.send(b"two").unwrap();

        let mut wire = BytesMut::from(writer.stream().as_slice());
        let payloads: Vec<_> = std::iter::from_fn(|| decode_frame(&mut wire, 64).unwrap())
            .map(|frame| frame.payload)
            .collect();
        assert_eq!(payloads, [&b"one"[..], &b""[..], &b"two"[..]]);
    }

    #[test]
    fn oversized_payload_writes_nothing() {
        let config = FrameConfig {
            max_frame_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Vec::new(), config);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, ChannelError::FrameTooLarge { size: 9, max: 4 }));
        assert!(writer.stream().is_empty());
    }

    #[test]
    fn short_writes_complete_the_frame_then_flush() {
        let mut writer = FrameWriter::new(Recorder::new(3, &[]));
        writer.send(b"trickle").unwrap();

        let sink = writer.stream();
        assert_eq!(sink.data.len(), HEADER_SIZE + 7);
        assert_eq!(sink.flushes, 1);
    }

    #[test]
    fn interrupted_write_is_retried() {
        let mut writer = FrameWriter::new(Recorder::new(usize::MAX, &[ErrorKind::Interrupted]));
        writer.send(b"retry").unwrap();
        assert_eq!(writer.stream().data.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn zero_length_write_is_fatal() {
        let mut writer = FrameWriter::new(Recorder::new(0, &[]));
        assert!(matches!(
            writer.send(b"x"),
            Err(ChannelError::Io(err)) if err.kind() == ErrorKind::WriteZero
        ));
    }

    #[test]
    fn broken_pipe_surfaces_as_io() {
        let mut writer = FrameWriter::new(Recorder::new(usize::MAX, &[ErrorKind::BrokenPipe]));
        assert!(matches!(
            writer.send(b"x"),
            Err(ChannelError::Io(err)) if err.kind() == ErrorKind::BrokenPipe
        ));
        assert_eq!(writer.stream().flushes, 0);
    }
}
