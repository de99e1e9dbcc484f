use std::io;

/// Errors that can occur in TCP transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The network name is not one of `tcp`, `tcp4`, `tcp6`.
    #[error("unsupported network {0:?} (expected tcp, tcp4 or tcp6)")]
    UnsupportedNetwork(String),

    /// The address could not be resolved to any socket address of the requested family.
    #[error("failed to resolve {address}: {source}")]
    Resolve { address: String, source: io::Error },

    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    Bind { address: String, source: io::Error },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {address}: {source}")]
    Connect { address: String, source: io::Error },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(io::Error),

    /// The transport-security layer rejected the stream.
    #[error("secure transport handshake failed: {0}")]
    Secure(io::Error),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The connection has been closed locally.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Used by the dial and accept loops to decide between backing off and
    /// giving up.
    pub fn is_temporary(&self) -> bool {
        match self {
            TransportError::Accept(err)
            | TransportError::Connect { source: err, .. }
            | TransportError::Io(err) => is_temporary_io(err),
            _ => false,
        }
    }

    /// Whether this error was caused by a deadline or timeout expiring.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Connect { source: err, .. } | TransportError::Io(err) => {
                matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
            }
            _ => false,
        }
    }
}

/// Classify an I/O error as transient.
pub fn is_temporary_io(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return true;
    }
    is_resource_exhaustion(err)
}

#[cfg(unix)]
fn is_resource_exhaustion(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_err: &io::Error) -> bool {
    false
}

pub type Result<T> = std::result::Result<T, TransportError>;
