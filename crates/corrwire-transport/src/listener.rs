use std::net::{SocketAddr, TcpListener, TcpStream};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::network::Network;

/// A bound TCP listener.
///
/// Accepts raw sockets only; wrapping them with transport security happens
/// on the per-connection thread via [`crate::Connection::accept`].
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to the first resolved address of `address` that succeeds.
    pub fn bind(network: Network, address: &str) -> Result<Self> {
        let mut last_err = None;
        for addr in network.resolve(address)? {
            match TcpListener::bind(addr) {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    info!(%local_addr, %network, "listening");
                    return Ok(Self {
                        listener,
                        local_addr,
                    });
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(TransportError::Bind {
            address: address.to_string(),
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no address")
            }),
        })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(remote = %addr, "accepted connection");
        Ok((stream, addr))
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
