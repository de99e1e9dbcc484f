//! TCP stream transport for corrwire.
//!
//! This is the lowest layer. It dials and listens on TCP (optionally wrapped by
//! a caller-supplied [`SecureTransport`]), and provides the [`Connection`] type
//! whose write side is serialized and deadline-bounded. Everything else builds
//! on top of it.

pub mod backoff;
pub mod conn;
pub mod error;
pub mod listener;
pub mod network;
pub mod secure;

pub use backoff::{Backoff, BackoffConfig};
pub use conn::{Connection, ConnectionReader};
pub use error::{is_temporary_io, Result, TransportError};
pub use listener::Listener;
pub use network::Network;
pub use secure::{SecureTransport, StreamHalves};
