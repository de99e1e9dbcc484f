use crate::codec::MAGIC;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header does not start with the protocol magic; the stream is desynchronized.
    #[error("invalid protocol magic 0x{found:08x} (expected 0x{expected:08x})", expected = MAGIC)]
    InvalidMagic { found: u32 },

    /// The payload exceeds what the 16-bit length field or the configured limit allows.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A frame slice is shorter than its header or its declared length.
    #[error("truncated frame ({len} bytes, need {need})")]
    Truncated { len: usize, need: usize },

    /// The stream ended in the middle of a frame.
    #[error("unexpected end of stream ({buffered} bytes of a partial frame buffered)")]
    UnexpectedEof { buffered: usize },

    /// An I/O error occurred while reading frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
