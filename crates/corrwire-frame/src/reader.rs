use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::codec::{decode_frame, peek_header, scan_frame, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally. Callers always get complete frames,
/// each with its own copy of the payload.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
    eof: bool,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            eof: false,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Ok(None)` when the stream ends cleanly on a frame boundary and
    /// [`FrameError::UnexpectedEof`] when it ends mid-frame.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some((id, total)) = self.next_complete()? {
                let mut raw = self.buf.split_to(total);
                raw.advance(HEADER_SIZE);
                trace!(packet_id = id, len = raw.len(), "frame decoded");
                return Ok(Some(Frame::new(id, raw.freeze())));
            }
            if self.eof {
                return Ok(None);
            }

            let chunk_size = self.config.read_chunk_size.max(HEADER_SIZE);
            let start = self.buf.len();
            self.buf.resize(start + chunk_size, 0);
            let read = match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    self.buf.truncate(start);
                    continue;
                }
                Err(err) => {
                    self.buf.truncate(start);
                    return Err(FrameError::Io(err));
                }
            };
            self.buf.truncate(start + read);

            if read == 0 {
                self.eof = true;
            }
        }
    }

    /// Locate a complete buffered frame, enforcing the configured payload limit.
    fn next_complete(&self) -> Result<Option<(u32, usize)>> {
        let scanned = scan_frame(&self.buf, self.eof)?;
        if let Some((_, len)) = peek_header(&self.buf)? {
            if len > self.config.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: len,
                    max: self.config.max_payload_size,
                });
            }
        }
        match scanned {
            Some(frame) => {
                let (id, _payload) = decode_frame(frame)?;
                Ok(Some((id, frame.len())))
            }
            None => Ok(None),
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: Read> Iterator for FrameReader<T> {
    type Item = Result<Frame>;

    /// Yields frames until clean end of stream or the first error, which is yielded once.
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_frame() {
            Ok(frame) => frame.map(Ok),
            Err(err) => {
                self.eof = true;
                self.buf.clear();
                Some(Err(err))
            }
        }
    }
}
