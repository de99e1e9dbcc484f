//! Packet-ID correlated request/response over pooled TCP connections.
//!
//! corrwire frames every message with a small fixed header carrying a packet
//! ID, keeps a self-healing pool of connections from a client to one server,
//! and matches each response to its request by ID rather than by arrival
//! order.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP dial/listen, serialized deadline writes, security seam
//! - [`frame`]: wire codec, buffer recycling, incremental frame reader
//! - [`peer`]: connection pool, client and server engines (behind `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use corrwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use corrwire_frame::*;
}

/// Re-export client and server types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use corrwire_peer::*;
}
