//! `tokio_util::codec` adapter for the corrwire frame format.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{
    decode_frame, encode_frame, peek_header, scan_frame, Frame, HEADER_SIZE, MAX_PAYLOAD,
};
use crate::error::{FrameError, Result};

/// Frame codec for `Framed` streams and sinks.
#[derive(Debug, Clone)]
pub struct CorrCodec {
    max_payload_size: usize,
}

impl CorrCodec {
    pub fn new() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
        }
    }

    /// Reject inbound frames declaring more than `max` payload bytes.
    pub fn with_max_payload_size(max: usize) -> Self {
        Self {
            max_payload_size: max.min(MAX_PAYLOAD),
        }
    }

    fn decode_at(&mut self, src: &mut BytesMut, at_eof: bool) -> Result<Option<Frame>> {
        if let Some((_, len)) = peek_header(src)? {
            if len > self.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: len,
                    max: self.max_payload_size,
                });
            }
        }
        let (id, total) = match scan_frame(src, at_eof)? {
            Some(frame) => (decode_frame(frame)?.0, frame.len()),
            None => {
                src.reserve(HEADER_SIZE);
                return Ok(None);
            }
        };
        let mut raw = src.split_to(total);
        raw.advance(HEADER_SIZE);
        Ok(Some(Frame::new(id, raw.freeze())))
    }
}

impl Default for CorrCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CorrCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        self.decode_at(src, false)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        self.decode_at(src, true)
    }
}

impl Encoder<Frame> for CorrCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.id, &item.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, CorrCodec::new());
        let mut stream = FramedRead::new(server, CorrCodec::new());

        sink.send(Frame::new(1, b"hello".to_vec())).await.unwrap();
        sink.send(Frame::new(0, Vec::new())).await.unwrap();
        drop(sink);

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!((first.id, first.payload.as_ref()), (1, b"hello".as_ref()));
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.id, 0);
        assert!(second.payload.is_empty());
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn decode_eof_with_partial_frame_errors() {
        let mut buf = BytesMut::new();
        encode_frame(3, b"partial", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);

        let mut codec = CorrCodec::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(FrameError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn decode_enforces_limit() {
        let mut buf = BytesMut::new();
        encode_frame(3, &[0u8; 32], &mut buf).unwrap();
        let mut codec = CorrCodec::with_max_payload_size(8);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::PayloadTooLarge { size: 32, max: 8 })
        ));
    }
}
