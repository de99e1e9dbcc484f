use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::network::Network;
use crate::secure::{server_name, SecureTransport, StreamHalves};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Read side of a [`Connection`], owned by the connection's reader thread.
pub type ConnectionReader = Box<dyn Read + Send>;

/// One live stream socket with a serialized, deadline-bounded write side.
///
/// Frames must never interleave on the wire, so at most one writer holds the
/// socket at a time. The read side is handed out separately at construction.
pub struct Connection {
    id: u64,
    socket: TcpStream,
    writer: Mutex<Box<dyn Write + Send>>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    closed: AtomicBool,
}

impl Connection {
    /// Dial `address` on `network`, trying each resolved address in turn.
    ///
    /// A zero `timeout` means no connect timeout.
    pub fn dial(
        network: Network,
        address: &str,
        timeout: Duration,
        security: Option<&dyn SecureTransport>,
    ) -> Result<(Self, ConnectionReader)> {
        let mut last_err = None;
        for addr in network.resolve(address)? {
            let attempt = if timeout.is_zero() {
                TcpStream::connect(addr)
            } else {
                TcpStream::connect_timeout(&addr, timeout)
            };
            match attempt {
                Ok(socket) => {
                    debug!(%addr, "connected");
                    let halves = match security {
                        Some(security) => security
                            .wrap_client(socket.try_clone()?, server_name(address))
                            .map_err(TransportError::Secure)?,
                        None => StreamHalves::plain(&socket)?,
                    };
                    return Self::from_parts(socket, halves);
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(TransportError::Connect {
            address: address.to_string(),
            source: last_err
                .unwrap_or_else(|| io::Error::new(ErrorKind::AddrNotAvailable, "no address")),
        })
    }

    /// Wrap an accepted inbound socket.
    pub fn accept(
        socket: TcpStream,
        security: Option<&dyn SecureTransport>,
    ) -> Result<(Self, ConnectionReader)> {
        let halves = match security {
            Some(security) => security
                .wrap_server(socket.try_clone()?)
                .map_err(TransportError::Secure)?,
            None => StreamHalves::plain(&socket)?,
        };
        Self::from_parts(socket, halves)
    }

    /// Build a connection from a raw socket and the stream halves layered over it.
    ///
    /// `socket` is kept as the control handle for deadlines, shutdown and
    /// addresses; all payload bytes go through `halves`.
    pub fn from_parts(socket: TcpStream, halves: StreamHalves) -> Result<(Self, ConnectionReader)> {
        socket.set_nodelay(true)?;
        let local_addr = socket.local_addr()?;
        let peer_addr = socket.peer_addr()?;
        let conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            socket,
            writer: Mutex::new(halves.writer),
            local_addr,
            peer_addr,
            closed: AtomicBool::new(false),
        };
        Ok((conn, halves.reader))
    }

    /// Write all of `bytes` before `deadline`.
    ///
    /// Holds the write lock for the whole frame. A deadline that has already
    /// passed fails with [`ErrorKind::TimedOut`] without touching the socket.
    /// A failure after part of `bytes` reached the socket closes the
    /// connection.
    pub fn write(&self, deadline: Instant, bytes: &[u8]) -> Result<usize> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let remaining = deadline
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
            .ok_or_else(|| io::Error::new(ErrorKind::TimedOut, "write deadline exceeded"))?;
        self.socket.set_write_timeout(Some(remaining))?;

        let mut offset = 0usize;
        let result = write_frame(&mut **writer, bytes, &mut offset);
        if let Err(err) = result {
            if offset > 0 {
                // The peer can no longer find the next frame boundary.
                warn!(
                    conn_id = self.id,
                    written = offset,
                    len = bytes.len(),
                    error = %err,
                    "closing connection after partial frame write"
                );
                self.close();
            }
            return Err(err.into());
        }
        Ok(offset)
    }

    /// Shut the socket down in both directions, waking the reader thread.
    ///
    /// Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(err) = self.socket.shutdown(Shutdown::Both) {
            // NotConnected just means the peer got there first.
            if err.kind() != ErrorKind::NotConnected {
                debug!(conn_id = self.id, error = %err, "socket shutdown failed");
            }
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Process-unique identity of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn write_frame(writer: &mut dyn Write, bytes: &[u8], offset: &mut usize) -> io::Result<()> {
    while *offset < bytes.len() {
        match writer.write(&bytes[*offset..]) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => *offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return Err(io::Error::new(ErrorKind::TimedOut, err))
            }
            Err(err) => return Err(err),
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
