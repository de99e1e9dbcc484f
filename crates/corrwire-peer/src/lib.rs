//! Pooled request/response engines for corrwire.
//!
//! This is the layer applications use. A [`Client`] keeps a self-healing pool
//! of connections to one server and matches responses to requests by packet
//! ID; a [`Server`] accepts connections and hands every inbound message to a
//! [`Handler`] together with a [`ReplyWriter`] bound to that message's ID.

pub mod client;
pub mod correlation;
pub mod error;
pub mod pool;
pub mod server;

pub use client::{Client, ClientConfig, PingAttempt};
pub use correlation::{CorrelationTable, PacketIds};
pub use error::{PeerError, Result};
pub use pool::{ConnectionPool, PoolMember};
pub use server::{Handler, Message, ReplyWriter, Server, ServerConfig, ServerHandle};
