//! `tokio_util` codec speaking the same length-prefixed wire format.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, truncated, DEFAULT_MAX_FRAME_SIZE};
use crate::error::ChannelError;

/// Frame codec for `FramedRead`/`FramedWrite` over async byte streams.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(decode_frame(src, self.max_frame_size)?.map(|frame| frame.payload))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(payload) => Ok(Some(payload)),
            None if src.is_empty() => Ok(None),
            None => Err(truncated(src)),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&item, self.max_frame_size, dst)
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(item, self.max_frame_size, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let mut sink = FramedWrite::new(client, FrameCodec::new());
        let mut stream = FramedRead::new(server, FrameCodec::new());

        sink.send(Bytes::from_static(b"first")).await.unwrap();
        sink.send(Bytes::from_static(b"second")).await.unwrap();
        drop(sink);

        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"first");
        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"second");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_truncated() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&100u32.to_be_bytes());
        wire.extend_from_slice(&[0u8; 10]);

        let mut stream = FramedRead::new(wire.as_slice(), FrameCodec::new());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Truncated {
                expected: 104,
                received: 14
            }
        ));
    }

    #[tokio::test]
    async fn oversized_declared_length_rejected() {
        let wire = 4096u32.to_be_bytes();
        let mut stream = FramedRead::new(&wire[..], FrameCodec::with_max_frame_size(64));

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::FrameTooLarge { size: 4096, max: 64 }));
    }
}
