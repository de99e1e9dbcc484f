//! Packet-ID correlated framing for corrwire.
//!
//! Every message is framed with:
//! - A 4-byte protocol magic (`0x00123456`) for desynchronization detection
//! - A 4-byte big-endian packet ID (0 = no reply expected)
//! - A 2-byte big-endian payload length (max 65535)
//!
//! The send path encodes into recycled [`BufferPool`] buffers (or in place
//! inside an owned payload); the receive path scans frame boundaries over a
//! byte stream with [`FrameReader`].

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod pool;
pub mod reader;

#[cfg(feature = "async")]
pub use async_codec::CorrCodec;
pub use codec::{
    decode_frame, encode_frame, encode_in_place, peek_header, scan_frame, Frame, FrameConfig,
    HEADER_SIZE, MAGIC, MAX_PAYLOAD, NO_REPLY,
};
pub use error::{FrameError, Result};
pub use pool::{BufferPool, EncodedFrame, PooledBuffer};
pub use reader::FrameReader;
