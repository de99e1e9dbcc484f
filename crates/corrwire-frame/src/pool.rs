//! Recycled encode buffers for the send path.
//!
//! Every pooled buffer starts with [`HEADER_SIZE`] bytes of header space and
//! no payload. Encoding writes the header over that space and appends the
//! payload; dropping the [`PooledBuffer`] truncates it back to header-only and
//! returns it to the freelist. Truncation is enough: the length field is
//! always rewritten before the bytes are read again.

use std::ops::Deref;
use std::sync::{Mutex, PoisonError};

use crate::codec::{encode_in_place, write_header, HEADER_SIZE, MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Default capacity of a freshly allocated buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Default number of idle buffers kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 256;

/// Thread-safe freelist of header-prefixed byte buffers.
///
/// No ordering guarantee on which idle buffer `acquire` hands back.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_capacity: usize,
    max_idle: usize,
}

impl BufferPool {
    /// Pool with the default buffer size and idle limit.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_IDLE)
    }

    /// Pool allocating `buffer_capacity`-byte buffers and keeping at most `max_idle` of them.
    pub fn with_limits(buffer_capacity: usize, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            buffer_capacity: buffer_capacity.max(HEADER_SIZE),
            max_idle,
        }
    }

    /// Take a header-only buffer, allocating if the freelist is empty.
    pub fn acquire(&self) -> PooledBuffer<'_> {
        let recycled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let buf = recycled.unwrap_or_else(|| {
            let mut buf = Vec::with_capacity(self.buffer_capacity);
            buf.resize(HEADER_SIZE, 0);
            buf
        });
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Reset `buf` to header-only and keep it for reuse.
    ///
    /// Only the logical length is reset; the capacity is kept.
    pub fn release(&self, mut buf: Vec<u8>) {
        buf.truncate(HEADER_SIZE);
        buf.resize(HEADER_SIZE, 0);
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }

    /// Number of buffers currently waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Encode `(id, payload)` into a pooled buffer: header first, then the payload copied in.
    pub fn encode(&self, id: u32, payload: &[u8]) -> Result<PooledBuffer<'_>> {
        let len = u16::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        })?;
        let mut pooled = self.acquire();
        let buf = pooled.as_mut_vec();
        if let Some(header) = buf.first_chunk_mut::<HEADER_SIZE>() {
            write_header(header, id, len);
        }
        buf.extend_from_slice(payload);
        Ok(pooled)
    }

    /// Encode an owned payload, choosing the cheaper strategy.
    ///
    /// With at least [`HEADER_SIZE`] bytes of spare capacity the frame is built
    /// inside `payload`'s own allocation; otherwise the payload is copied into a
    /// pooled buffer. Both produce identical bytes.
    pub fn encode_owned(&self, id: u32, payload: Vec<u8>) -> Result<EncodedFrame<'_>> {
        if payload.capacity() - payload.len() >= HEADER_SIZE {
            encode_in_place(id, payload).map(EncodedFrame::InPlace)
        } else {
            self.encode(id, &payload).map(EncodedFrame::Pooled)
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer on loan from a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl PooledBuffer<'_> {
    fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl AsRef<[u8]> for PooledBuffer<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

/// An encoded frame ready to write, from either encode strategy.
#[derive(Debug)]
pub enum EncodedFrame<'a> {
    /// Built inside the caller's payload allocation.
    InPlace(Vec<u8>),
    /// Built in a recycled buffer.
    Pooled(PooledBuffer<'a>),
}

impl Deref for EncodedFrame<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            EncodedFrame::InPlace(buf) => buf.as_slice(),
            EncodedFrame::Pooled(buf) => &buf[..],
        }
    }
}

impl AsRef<[u8]> for EncodedFrame<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, encode_frame};

    fn reference(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(id, payload, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn acquire_returns_header_only_buffer() {
        let pool = BufferPool::new();
        let buf = pool.acquire();
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn drop_returns_buffer_truncated() {
        let pool = BufferPool::new();
        {
            let encoded = pool.encode(1, b"some payload").unwrap();
            assert_eq!(encoded.len(), HEADER_SIZE + 12);
        }
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.acquire();
        assert_eq!(reused.len(), HEADER_SIZE);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn reused_buffer_does_not_leak_old_payload() {
        let pool = BufferPool::with_limits(64, 1);
        drop(pool.encode(1, b"a much longer first payload").unwrap());

        let second = pool.encode(2, b"short").unwrap();
        assert_eq!(&second[..], reference(2, b"short").as_slice());
    }

    #[test]
    fn release_keeps_capacity() {
        let pool = BufferPool::with_limits(16, 4);
        let mut big = Vec::with_capacity(4096);
        big.extend_from_slice(&[7u8; 2000]);
        pool.release(big);

        let buf = pool.acquire();
        assert_eq!(buf.len(), HEADER_SIZE);
        assert!(buf.buf.as_ref().unwrap().capacity() >= 4096);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool = BufferPool::with_limits(32, 2);
        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        drop((a, b, c));
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn pooled_encoding_matches_reference() {
        let pool = BufferPool::new();
        let encoded = pool.encode(0xDEAD_BEEF, b"payload").unwrap();
        assert_eq!(&encoded[..], reference(0xDEAD_BEEF, b"payload").as_slice());
    }

    #[test]
    fn encode_owned_strategies_agree() {
        let pool = BufferPool::new();

        let mut roomy = Vec::with_capacity(64);
        roomy.extend_from_slice(b"hello");
        let in_place = pool.encode_owned(5, roomy).unwrap();
        assert!(matches!(in_place, EncodedFrame::InPlace(_)));

        let mut tight = Vec::with_capacity(5);
        tight.extend_from_slice(b"hello");
        let pooled = pool.encode_owned(5, tight).unwrap();
        assert!(matches!(pooled, EncodedFrame::Pooled(_)));

        assert_eq!(&in_place[..], &pooled[..]);
        assert_eq!(decode_frame(&pooled).unwrap(), (5, b"hello".as_ref()));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let pool = BufferPool::new();
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            pool.encode(1, &payload),
            Err(FrameError::PayloadTooLarge { .. })
        ));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn concurrent_encoders_share_pool() {
        let pool = Arc::new(BufferPool::with_limits(128, 8));
        let workers: Vec<_> = (0..8u32)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let payload = format!("w{worker}-{i}");
                        let encoded = pool.encode(i + 1, payload.as_bytes()).unwrap();
                        let (id, decoded) = decode_frame(&encoded).unwrap();
                        assert_eq!(id, i + 1);
                        assert_eq!(decoded, payload.as_bytes());
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(pool.idle_count() <= 8);
    }
}
