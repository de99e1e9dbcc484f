use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: magic (4) + packet id (4) + length (2) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// Protocol magic. Any other leading word means the stream is desynchronized.
pub const MAGIC: u32 = 0x0012_3456;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Packet id meaning "no reply expected".
pub const NO_REPLY: u32 = 0;

/// A decoded frame with an owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Correlation token; [`NO_REPLY`] for fire-and-forget messages.
    pub id: u32,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(id: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// Whether the sender is waiting for a correlated response.
    pub fn expects_reply(&self) -> bool {
        self.id != NO_REPLY
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Write the 10-byte header for a payload of `payload_len` bytes into `dst`.
///
/// Wire format (all fields big-endian):
/// ```text
/// ┌──────────────┬──────────────┬──────────┬────────────────┐
/// │ Magic (4B)   │ Packet ID    │ Length   │ Payload        │
/// │ 0x00123456   │ (4B)         │ (2B)     │ (Length bytes) │
/// └──────────────┴──────────────┴──────────┴────────────────┘
/// ```
pub fn write_header(dst: &mut [u8; HEADER_SIZE], id: u32, payload_len: u16) {
    dst[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    dst[4..8].copy_from_slice(&id.to_be_bytes());
    dst[8..10].copy_from_slice(&payload_len.to_be_bytes());
}

fn checked_len(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: MAX_PAYLOAD,
    })
}

/// Encode a frame by appending header then payload to `dst`.
pub fn encode_frame(id: u32, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let len = checked_len(payload.len())?;
    let mut header = [0u8; HEADER_SIZE];
    write_header(&mut header, id, len);
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header);
    dst.put_slice(payload);
    Ok(())
}

/// Encode a frame inside the payload's own allocation.
///
/// The payload is shifted right by [`HEADER_SIZE`] and the header written in
/// front of it. No reallocation happens when `buf` has at least
/// [`HEADER_SIZE`] bytes of spare capacity. Output is byte-identical to
/// [`encode_frame`].
pub fn encode_in_place(id: u32, mut buf: Vec<u8>) -> Result<Vec<u8>> {
    let len = buf.len();
    let wire_len = checked_len(len)?;
    buf.resize(len + HEADER_SIZE, 0);
    buf.copy_within(0..len, HEADER_SIZE);
    if let Some(header) = buf.first_chunk_mut::<HEADER_SIZE>() {
        write_header(header, id, wire_len);
    }
    Ok(buf)
}

/// Validate the header of `buf` and return the declared payload length.
///
/// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
pub fn peek_header(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let Some(header) = buf.get(..HEADER_SIZE) else {
        return Ok(None);
    };
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(FrameError::InvalidMagic { found: magic });
    }
    let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let len = u16::from_be_bytes([header[8], header[9]]) as usize;
    Ok(Some((id, len)))
}

/// Split a complete frame into its packet id and a view of its payload.
///
/// Zero-copy: the payload borrows from `frame`, so copy it before the
/// underlying buffer is reused.
pub fn decode_frame(frame: &[u8]) -> Result<(u32, &[u8])> {
    let (id, len) = peek_header(frame)?.ok_or(FrameError::Truncated {
        len: frame.len(),
        need: HEADER_SIZE,
    })?;
    let total = HEADER_SIZE + len;
    let payload = frame
        .get(HEADER_SIZE..total)
        .ok_or(FrameError::Truncated {
            len: frame.len(),
            need: total,
        })?;
    Ok((id, payload))
}

/// Find the first complete frame at the front of a stream buffer.
///
/// - fewer than [`HEADER_SIZE`] bytes, or a partial frame: `Ok(None)`, read more;
/// - a complete frame: `Ok(Some(frame))`; `frame.len()` bytes are consumed;
/// - a bad magic word: [`FrameError::InvalidMagic`], the stream is unusable;
/// - `at_eof` with a partial frame still buffered: [`FrameError::UnexpectedEof`].
///
/// An empty buffer at end of stream is a clean end and yields `Ok(None)`.
pub fn scan_frame(buf: &[u8], at_eof: bool) -> Result<Option<&[u8]>> {
    if let Some((_id, len)) = peek_header(buf)? {
        let total = HEADER_SIZE + len;
        if buf.len() >= total {
            return Ok(Some(&buf[..total]));
        }
    }
    if at_eof && !buf.is_empty() {
        return Err(FrameError::UnexpectedEof {
            buffered: buf.len(),
        });
    }
    Ok(None)
}

/// Configuration for the frame reader.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum accepted payload size in bytes. Default (and ceiling): 65535.
    pub max_payload_size: usize,
    /// Bytes requested from the stream per read. Default: 8 KiB.
    pub read_chunk_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_chunk_size: 8 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(id: u32, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(id, payload, &mut buf).unwrap();
        buf
    }

    #[test]
    fn header_layout_is_big_endian() {
        let wire = encoded(0x0102_0304, b"abc");
        assert_eq!(
            &wire[..HEADER_SIZE],
            &[0x00, 0x12, 0x34, 0x56, 0x01, 0x02, 0x03, 0x04, 0x00, 0x03]
        );
        assert_eq!(&wire[HEADER_SIZE..], b"abc");
    }

    #[test]
    fn encode_decode_roundtrip() {
        let wire = encoded(42, b"hello, corrwire!");
        let (id, payload) = decode_frame(&wire).unwrap();
        assert_eq!(id, 42);
        assert_eq!(payload, b"hello, corrwire!");
    }

    #[test]
    fn roundtrip_at_length_limits() {
        for len in [0usize, 1, MAX_PAYLOAD] {
            let payload = vec![0x5A; len];
            let wire = encoded(u32::MAX, &payload);
            let (id, decoded) = decode_frame(&wire).unwrap();
            assert_eq!(id, u32::MAX);
            assert_eq!(decoded, payload.as_slice());
        }
    }

    #[test]
    fn in_place_matches_appended_encoding() {
        let payload = b"identical bytes".to_vec();
        let mut owned = Vec::with_capacity(payload.len() + HEADER_SIZE);
        owned.extend_from_slice(&payload);
        let before = owned.as_ptr();

        let in_place = encode_in_place(7, owned).unwrap();

        assert_eq!(in_place.as_slice(), &encoded(7, &payload)[..]);
        assert_eq!(in_place.as_ptr(), before, "spare capacity must be reused");
    }

    #[test]
    fn in_place_without_spare_capacity_still_correct() {
        let payload = vec![1u8, 2, 3];
        let wire = encode_in_place(9, payload.clone()).unwrap();
        assert_eq!(wire.as_slice(), &encoded(9, &payload)[..]);
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame(1, &payload, &mut buf),
            Err(FrameError::PayloadTooLarge { .. })
        ));
        assert!(buf.is_empty());
        assert!(matches!(
            encode_in_place(1, payload),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut wire = encoded(1, b"x");
        wire[0] = 0xFF;
        assert!(matches!(
            decode_frame(&wire),
            Err(FrameError::InvalidMagic { found }) if found == 0xFF12_3456
        ));
    }

    #[test]
    fn decode_rejects_short_slices() {
        let wire = encoded(1, b"hello");
        assert!(matches!(
            decode_frame(&wire[..4]),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            decode_frame(&wire[..HEADER_SIZE + 2]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn scan_requests_more_below_header() {
        let wire = encoded(1, b"hello");
        assert!(scan_frame(&wire[..HEADER_SIZE - 1], false).unwrap().is_none());
        assert!(scan_frame(&[], false).unwrap().is_none());
    }

    #[test]
    fn scan_requests_more_for_partial_payload() {
        let wire = encoded(1, b"hello");
        assert!(scan_frame(&wire[..HEADER_SIZE + 3], false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn scan_returns_exactly_one_frame() {
        let mut wire = encoded(1, b"first");
        wire.extend_from_slice(&encoded(2, b"second"));

        let frame = scan_frame(&wire, false).unwrap().unwrap();
        assert_eq!(frame.len(), HEADER_SIZE + 5);
        assert_eq!(decode_frame(frame).unwrap(), (1, b"first".as_ref()));
    }

    #[test]
    fn scan_accepts_header_only_frame() {
        let wire = encoded(3, b"");
        let frame = scan_frame(&wire, false).unwrap().unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);
        assert_eq!(decode_frame(frame).unwrap(), (3, b"".as_ref()));
    }

    #[test]
    fn scan_rejects_bad_magic_once_header_buffered() {
        let bytes = [0u8; HEADER_SIZE];
        assert!(matches!(
            scan_frame(&bytes, false),
            Err(FrameError::InvalidMagic { found: 0 })
        ));
        // Not enough bytes to judge yet.
        assert!(scan_frame(&bytes[..3], false).unwrap().is_none());
    }

    #[test]
    fn scan_partial_frame_at_eof_is_error() {
        let wire = encoded(1, b"hello");
        assert!(matches!(
            scan_frame(&wire[..HEADER_SIZE + 1], true),
            Err(FrameError::UnexpectedEof { buffered }) if buffered == HEADER_SIZE + 1
        ));
        assert!(matches!(
            scan_frame(&wire[..2], true),
            Err(FrameError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn scan_empty_buffer_at_eof_is_clean_end() {
        assert!(scan_frame(&[], true).unwrap().is_none());
    }

    #[test]
    fn scan_complete_frame_at_eof_is_returned() {
        let wire = encoded(5, b"tail");
        let frame = scan_frame(&wire, true).unwrap().unwrap();
        assert_eq!(decode_frame(frame).unwrap(), (5, b"tail".as_ref()));
    }

    #[test]
    fn frame_helpers() {
        let frame = Frame::new(NO_REPLY, Bytes::from_static(b"test"));
        assert!(!frame.expects_reply());
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4);
        assert!(Frame::new(1, Vec::new()).expects_reply());
    }
}
