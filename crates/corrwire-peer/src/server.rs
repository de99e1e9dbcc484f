use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use corrwire_frame::{BufferPool, FrameConfig, FrameReader, NO_REPLY};
use corrwire_transport::{
    Backoff, BackoffConfig, Connection, ConnectionReader, Listener, Network, SecureTransport,
};
use tracing::{debug, error, info, warn};

use crate::error::{PeerError, Result};
use crate::pool::ConnectionPool;

/// Default bound on each reply write.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// One decoded inbound message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Packet ID; [`NO_REPLY`] if the sender expects nothing back.
    pub id: u32,
    pub payload: Bytes,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

impl Message {
    pub fn expects_reply(&self) -> bool {
        self.id != NO_REPLY
    }
}

/// Application logic invoked once per inbound message.
///
/// Every call runs on its own thread, so a slow handler never holds up
/// reading of later frames on the same connection.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, reply: ReplyWriter, message: Message);
}

impl<F> Handler for F
where
    F: Fn(ReplyWriter, Message) + Send + Sync + 'static,
{
    fn serve(&self, reply: ReplyWriter, message: Message) {
        self(reply, message)
    }
}

/// Writes correlated replies for one inbound message.
///
/// Each call sends one complete frame carrying the bound packet ID. Writing
/// more than once sends more than one frame; the client only delivers the
/// first and drops the rest as unmatched.
pub struct ReplyWriter {
    id: u32,
    conn: Arc<Connection>,
    buffers: Arc<BufferPool>,
    write_timeout: Duration,
}

impl ReplyWriter {
    /// Send `payload` as the reply. Returns the payload length on success.
    ///
    /// Fails with [`PeerError::NoReply`] without any I/O if the message was
    /// sent with packet ID 0.
    pub fn reply(&self, payload: &[u8]) -> Result<usize> {
        self.ensure_reply_expected()?;
        let frame = self.buffers.encode(self.id, payload)?;
        self.conn.write(Instant::now() + self.write_timeout, &frame)?;
        Ok(payload.len())
    }

    /// Send an owned `payload`, framing it in place when it has spare capacity.
    pub fn reply_owned(&self, payload: Vec<u8>) -> Result<usize> {
        self.ensure_reply_expected()?;
        let len = payload.len();
        let frame = self.buffers.encode_owned(self.id, payload)?;
        self.conn.write(Instant::now() + self.write_timeout, &frame)?;
        Ok(len)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn expects_reply(&self) -> bool {
        self.id != NO_REPLY
    }

    fn ensure_reply_expected(&self) -> Result<()> {
        if self.id == NO_REPLY {
            return Err(PeerError::NoReply);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplyWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyWriter")
            .field("id", &self.id)
            .field("conn_id", &self.conn.id())
            .finish_non_exhaustive()
    }
}

/// Server settings.
#[derive(Clone)]
pub struct ServerConfig {
    /// `"tcp"`, `"tcp4"` or `"tcp6"`.
    pub network: String,
    /// Listen address; port 0 picks a free port.
    pub address: String,
    pub handler: Option<Arc<dyn Handler>>,
    pub security: Option<Arc<dyn SecureTransport>>,
    pub write_timeout: Duration,
    /// Delay policy between temporary accept failures.
    pub backoff: BackoffConfig,
    /// Inbound frame limits.
    pub frame: FrameConfig,
}

impl ServerConfig {
    /// Defaults for listening on `address` over TCP. A handler must still be set.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Override the network (`tcp`, `tcp4`, `tcp6`).
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Set the handler invoked for every inbound message.
    pub fn with_handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Wrap every accepted socket with `security`.
    pub fn with_security(mut self, security: Arc<dyn SecureTransport>) -> Self {
        self.security = Some(security);
        self
    }

    /// Override the bound on each reply write.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Override the accept retry backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override inbound frame limits.
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    fn validate(&self) -> Result<(Network, Arc<dyn Handler>)> {
        if self.network.is_empty() {
            return Err(PeerError::Config("network cannot be empty".to_string()));
        }
        let network = self
            .network
            .parse::<Network>()
            .map_err(|err| PeerError::Config(err.to_string()))?;
        if self.address.is_empty() {
            return Err(PeerError::Config("address cannot be empty".to_string()));
        }
        let handler = self
            .handler
            .clone()
            .ok_or_else(|| PeerError::Config("handler is required".to_string()))?;
        Ok((network, handler))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: Network::default().to_string(),
            address: String::new(),
            handler: None,
            security: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            backoff: BackoffConfig::default(),
            frame: FrameConfig::default(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("handler", &self.handler.is_some())
            .field("secure", &self.security.is_some())
            .field("write_timeout", &self.write_timeout)
            .field("backoff", &self.backoff)
            .field("frame", &self.frame)
            .finish()
    }
}

struct ServerState {
    local_addr: SocketAddr,
    shutdown: AtomicBool,
    /// Open inbound connections, for lifecycle only.
    conns: ConnectionPool,
}

impl ServerState {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Stop accepting and close every open inbound connection.
    ///
    /// [`Server::serve`] returns `Ok(())` shortly after. Handlers already
    /// running finish, but their replies fail.
    pub fn shutdown(&self) {
        if self.state.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unblock accept() with a throwaway connection.
        let wake = wake_addr(self.state.local_addr);
        if let Err(err) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
            debug!(addr = %wake, error = %err, "listener wake-up connect failed");
        }
        let closed = self.state.conns.close_all();
        info!(local = %self.state.local_addr, closed, "server shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.is_shut_down()
    }

    /// Number of open inbound connections.
    pub fn connection_count(&self) -> usize {
        self.state.conns.size()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("local_addr", &self.state.local_addr)
            .field("shut_down", &self.state.is_shut_down())
            .finish()
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}

/// Accepting server that dispatches every inbound frame to a [`Handler`].
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    listener: Listener,
    buffers: Arc<BufferPool>,
    state: Arc<ServerState>,
}

impl Server {
    /// Validate `config` and bind the listener.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let (network, handler) = config.validate()?;
        let listener = Listener::bind(network, &config.address)?;
        let state = Arc::new(ServerState {
            local_addr: listener.local_addr(),
            shutdown: AtomicBool::new(false),
            conns: ConnectionPool::new(),
        });
        Ok(Self {
            config,
            handler,
            listener,
            buffers: Arc::new(BufferPool::new()),
            state,
        })
    }

    /// Bind and serve until shutdown or a fatal accept error.
    pub fn listen_and_serve(config: ServerConfig) -> Result<()> {
        Self::bind(config)?.serve()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.state.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Run the accept loop on the current thread.
    ///
    /// Temporary accept errors are retried with backoff; any other accept
    /// error stops the loop and is returned. Returns `Ok(())` after
    /// [`ServerHandle::shutdown`].
    pub fn serve(&self) -> Result<()> {
        let mut backoff = Backoff::new(self.config.backoff);
        loop {
            let accepted = self.listener.accept();
            if self.state.is_shut_down() {
                return Ok(());
            }
            match accepted {
                Ok((socket, remote)) => {
                    backoff.reset();
                    self.spawn_connection(socket, remote);
                }
                Err(err) if err.is_temporary() => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "accept failed; retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) => {
                    error!(local = %self.state.local_addr, error = %err, "accept failed; stopping");
                    return Err(err.into());
                }
            }
        }
    }

    fn spawn_connection(&self, socket: TcpStream, remote: SocketAddr) {
        let session = Session {
            handler: Arc::clone(&self.handler),
            security: self.config.security.clone(),
            buffers: Arc::clone(&self.buffers),
            state: Arc::clone(&self.state),
            write_timeout: self.config.write_timeout,
            frame: self.config.frame.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("corrwire-serve-{remote}"))
            .spawn(move || session.run(socket));
        if let Err(err) = spawned {
            warn!(%remote, error = %err, "failed to start connection thread; dropping");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.state.local_addr)
            .finish_non_exhaustive()
    }
}

/// Everything one inbound connection's thread needs.
struct Session {
    handler: Arc<dyn Handler>,
    security: Option<Arc<dyn SecureTransport>>,
    buffers: Arc<BufferPool>,
    state: Arc<ServerState>,
    write_timeout: Duration,
    frame: FrameConfig,
}

impl Session {
    fn run(self, socket: TcpStream) {
        let (conn, reader) = match Connection::accept(socket, self.security.as_deref()) {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "failed to set up inbound connection");
                return;
            }
        };
        let conn = Arc::new(conn);
        self.state.conns.add(Arc::clone(&conn));
        // shutdown() may have run between accept and tracking.
        if self.state.is_shut_down() {
            self.state.conns.remove(&conn);
            return;
        }
        info!(
            conn_id = conn.id(),
            local = %conn.local_addr(),
            remote = %conn.peer_addr(),
            "connection opened"
        );

        self.read_loop(&conn, reader);

        self.state.conns.remove(&conn);
        info!(
            conn_id = conn.id(),
            local = %conn.local_addr(),
            remote = %conn.peer_addr(),
            "connection closed"
        );
    }

    fn read_loop(&self, conn: &Arc<Connection>, reader: ConnectionReader) {
        let mut frames = FrameReader::with_config(reader, self.frame.clone());
        loop {
            match frames.read_frame() {
                Ok(Some(frame)) => self.dispatch(conn, frame.id, frame.payload),
                Ok(None) => return,
                Err(err) => {
                    if !conn.is_closed() {
                        warn!(conn_id = conn.id(), error = %err, "connection read failed");
                    }
                    return;
                }
            }
        }
    }

    fn dispatch(&self, conn: &Arc<Connection>, id: u32, payload: Bytes) {
        let reply = ReplyWriter {
            id,
            conn: Arc::clone(conn),
            buffers: Arc::clone(&self.buffers),
            write_timeout: self.write_timeout,
        };
        let message = Message {
            id,
            payload,
            local_addr: conn.local_addr(),
            remote_addr: conn.peer_addr(),
        };
        let handler = Arc::clone(&self.handler);
        debug!(conn_id = conn.id(), packet_id = id, "dispatching message");
        let spawned = thread::Builder::new()
            .name(format!("corrwire-dispatch-{}", conn.id()))
            .spawn(move || handler.serve(reply, message));
        if let Err(err) = spawned {
            warn!(
                conn_id = conn.id(),
                packet_id = id,
                error = %err,
                "failed to dispatch message"
            );
        }
    }
}
