//! Pluggable transport security.
//!
//! corrwire does not implement TLS itself. A [`SecureTransport`] supplied by the
//! embedding application wraps each freshly connected or accepted TCP socket and
//! hands back independent read and write halves. The raw socket stays
//! underneath, so write deadlines, shutdown and address reporting keep working
//! on the wrapped stream.

use std::io::{self, Read, Write};
use std::net::TcpStream;

/// Independently owned read and write sides of one stream.
///
/// The read half is driven by a single reader thread; the write half is
/// shared behind the connection's write lock.
pub struct StreamHalves {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

impl StreamHalves {
    /// Split a plain TCP socket by cloning its descriptor.
    pub fn plain(socket: &TcpStream) -> io::Result<Self> {
        Ok(Self {
            reader: Box::new(socket.try_clone()?),
            writer: Box::new(socket.try_clone()?),
        })
    }
}

impl std::fmt::Debug for StreamHalves {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHalves").finish_non_exhaustive()
    }
}

/// Wraps TCP sockets in a security layer (typically TLS).
///
/// Both methods receive a socket the implementation may clone, wrap and
/// split as it sees fit. They run on the connection's own thread, so a
/// blocking handshake only delays that connection.
pub trait SecureTransport: Send + Sync {
    /// Wrap an outbound socket. `server_name` is the host part of the dialed address.
    fn wrap_client(&self, socket: TcpStream, server_name: &str) -> io::Result<StreamHalves>;

    /// Wrap an accepted inbound socket.
    fn wrap_server(&self, socket: TcpStream) -> io::Result<StreamHalves>;
}

/// Host part of a `host:port` address, with IPv6 brackets removed.
pub fn server_name(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, _port)) => host,
        None => address,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
