/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// A required setting is missing or invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] corrwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] corrwire_frame::FrameError),

    /// The pool had no live connection at send time.
    #[error("no connection to host")]
    NoConnection,

    /// No correlated response arrived before the deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A handler tried to answer a message sent without a reply id.
    #[error("reply to no-reply packet")]
    NoReply,

    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

impl PeerError {
    /// Whether the failure was a deadline or timeout expiring.
    pub fn is_timeout(&self) -> bool {
        match self {
            PeerError::DeadlineExceeded => true,
            PeerError::Transport(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Whether the same call may succeed if retried later.
    pub fn is_temporary(&self) -> bool {
        match self {
            PeerError::DeadlineExceeded | PeerError::NoConnection => true,
            PeerError::Transport(err) => err.is_temporary(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
