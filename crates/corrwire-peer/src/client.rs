use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use corrwire_frame::{BufferPool, FrameConfig, FrameReader, NO_REPLY};
use corrwire_transport::{
    Backoff, BackoffConfig, Connection, ConnectionReader, Network, SecureTransport,
    TransportError,
};
use tracing::{debug, info, warn};

use crate::correlation::{CorrelationTable, PacketIds};
use crate::error::{PeerError, Result};
use crate::pool::ConnectionPool;

/// Default connect timeout per dial attempt.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between maintenance passes once the pool is full.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// Default polling interval for [`Client::ready`].
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Client settings.
#[derive(Clone)]
pub struct ClientConfig {
    /// `"tcp"`, `"tcp4"` or `"tcp6"`.
    pub network: String,
    /// `host:port` of the server.
    pub address: String,
    pub dial_timeout: Duration,
    /// Number of connections the pool is kept at.
    pub conn_count: usize,
    pub security: Option<Arc<dyn SecureTransport>>,
    pub reconnect_interval: Duration,
    pub ready_poll_interval: Duration,
    /// Delay policy between failed dials.
    pub backoff: BackoffConfig,
    /// Inbound frame limits.
    pub frame: FrameConfig,
}

impl ClientConfig {
    /// Defaults for one TCP connection to `address`.
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

    /// Override how many connections the pool keeps open.
    pub fn with_conn_count(mut self, count: usize) -> Self {
        self.conn_count = count;
        self
    }

    /// Override the per-dial connect timeout. Zero disables it.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Wrap every dialed socket with `security`.
    pub fn with_security(mut self, security: Arc<dyn SecureTransport>) -> Self {
        self.security = Some(security);
        self
    }

    /// Override the pause between pool top-up passes.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Override how often [`Client::ready`] checks the pool.
    pub fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }

    /// Override the dial retry backoff.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override inbound frame limits.
    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    fn validate(&self) -> Result<Network> {
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
        if self.conn_count == 0 {
            return Err(PeerError::Config(
                "connection count must be greater than zero".to_string(),
            ));
        }
        Ok(network)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            network: Network::default().to_string(),
            address: String::new(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            conn_count: 1,
            security: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
            backoff: BackoffConfig::default(),
            frame: FrameConfig::default(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("network", &self.network)
            .field("address", &self.address)
            .field("dial_timeout", &self.dial_timeout)
            .field("conn_count", &self.conn_count)
            .field("secure", &self.security.is_some())
            .field("reconnect_interval", &self.reconnect_interval)
            .field("ready_poll_interval", &self.ready_poll_interval)
            .field("backoff", &self.backoff)
            .field("frame", &self.frame)
            .finish()
    }
}

/// One attempt made by [`Client::ping_with`].
#[derive(Debug)]
pub struct PingAttempt {
    /// 1-based attempt number.
    pub seq: u64,
    /// Time from send to reply or failure.
    pub elapsed: Duration,
    pub result: Result<Bytes>,
    /// Consecutive failures including this attempt.
    pub failures: u32,
}

struct Shared {
    config: ClientConfig,
    network: Network,
    pool: ConnectionPool,
    pending: CorrelationTable,
    ids: PacketIds,
    buffers: BufferPool,
    closed: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` unless closed first. Returns `false` if closed.
    fn pause(&self, duration: Duration) -> bool {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        let (closed, _) = self
            .wake
            .wait_timeout_while(closed, duration, |closed| !*closed)
            .unwrap_or_else(PoisonError::into_inner);
        !*closed
    }

    fn maintain(self: Arc<Self>) {
        let mut backoff = Backoff::new(self.config.backoff);
        loop {
            while self.pool.size() < self.config.conn_count {
                if self.is_closed() {
                    return;
                }
                match self.connect() {
                    Ok(()) => backoff.reset(),
                    Err(err) => {
                        let delay = backoff.next_delay();
                        warn!(
                            address = %self.config.address,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "dial failed; retrying"
                        );
                        if !self.pause(delay) {
                            return;
                        }
                    }
                }
            }
            if !self.pause(self.config.reconnect_interval) {
                return;
            }
        }
    }

    fn connect(self: &Arc<Self>) -> Result<()> {
        let (conn, reader) = Connection::dial(
            self.network,
            &self.config.address,
            self.config.dial_timeout,
            self.config.security.as_deref(),
        )?;
        let conn = Arc::new(conn);
        info!(
            conn_id = conn.id(),
            local = %conn.local_addr(),
            remote = %conn.peer_addr(),
            "connection opened"
        );

        self.pool.add(Arc::clone(&conn));
        let shared = Arc::clone(self);
        let reader_conn = Arc::clone(&conn);
        let spawned = thread::Builder::new()
            .name(format!("corrwire-conn-{}", conn.id()))
            .spawn(move || shared.read_loop(reader_conn, reader));
        if let Err(err) = spawned {
            self.pool.remove(&conn);
            return Err(TransportError::Io(err).into());
        }

        // close() may have drained the pool while we were dialing.
        if self.is_closed() {
            self.pool.remove(&conn);
        }
        Ok(())
    }

    fn read_loop(&self, conn: Arc<Connection>, reader: ConnectionReader) {
        let mut frames = FrameReader::with_config(reader, self.config.frame.clone());
        loop {
            match frames.read_frame() {
                Ok(Some(frame)) => {
                    let id = frame.id;
                    if !self.pending.resolve(id, frame.payload) {
                        debug!(conn_id = conn.id(), packet_id = id, "dropping unmatched response");
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    if !conn.is_closed() {
                        warn!(conn_id = conn.id(), error = %err, "connection read failed");
                    }
                    break;
                }
            }
        }

        self.pool.remove(&conn);
        info!(
            conn_id = conn.id(),
            local = %conn.local_addr(),
            remote = %conn.peer_addr(),
            "connection closed"
        );
    }
}

/// Pooled, self-healing client with packet-ID correlated requests.
///
/// Construction starts a maintenance thread that keeps `conn_count`
/// connections open to the server and a reader thread per connection.
/// Requests are spread across connections round-robin.
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Validate `config` and start connecting in the background.
    ///
    /// Returns as soon as the maintenance thread is running; use
    /// [`ready`](Self::ready) to wait for the first connection.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let network = config.validate()?;
        let shared = Arc::new(Shared {
            config,
            network,
            pool: ConnectionPool::new(),
            pending: CorrelationTable::new(),
            ids: PacketIds::new(),
            buffers: BufferPool::new(),
            closed: Mutex::new(false),
            wake: Condvar::new(),
        });

        let maintainer = Arc::clone(&shared);
        thread::Builder::new()
            .name("corrwire-client".to_string())
            .spawn(move || maintainer.maintain())
            .map_err(TransportError::Io)?;

        Ok(Self { shared })
    }

    /// Wait until at least one connection is up, or `deadline` passes.
    pub fn ready(&self, deadline: Instant) -> bool {
        loop {
            if self.shared.is_closed() {
                return false;
            }
            if !self.shared.pool.is_empty() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if !self
                .shared
                .pause(remaining.min(self.shared.config.ready_poll_interval))
            {
                return false;
            }
        }
    }

    /// Send `payload` and wait for the correlated response until `deadline`.
    pub fn send(&self, deadline: Instant, payload: &[u8]) -> Result<Bytes> {
        self.ensure_open()?;
        let id = self.shared.ids.next_id();
        let frame = self.shared.buffers.encode(id, payload)?;
        self.round_trip(deadline, id, &frame)
    }

    /// Like [`send`](Self::send), but takes the payload by value so a buffer
    /// with at least 10 bytes of spare capacity is framed without copying.
    pub fn send_owned(&self, deadline: Instant, payload: Vec<u8>) -> Result<Bytes> {
        self.ensure_open()?;
        let id = self.shared.ids.next_id();
        let frame = self.shared.buffers.encode_owned(id, payload)?;
        self.round_trip(deadline, id, &frame)
    }

    /// Send `payload` with packet ID 0. Only the write outcome is reported.
    pub fn send_no_reply(&self, deadline: Instant, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let frame = self.shared.buffers.encode(NO_REPLY, payload)?;
        self.write_to(&self.next_connection()?, deadline, &frame)
    }

    pub fn send_owned_no_reply(&self, deadline: Instant, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        let frame = self.shared.buffers.encode_owned(NO_REPLY, payload)?;
        self.write_to(&self.next_connection()?, deadline, &frame)
    }

    /// Probe the server every `interval` until `max_retry` consecutive sends fail.
    ///
    /// Returns the error of the last failed attempt. Returns `Ok(())` without
    /// sending anything if `max_retry` is 0.
    pub fn ping(
        &self,
        payload: &[u8],
        max_retry: u32,
        interval: Duration,
        timeout: Duration,
    ) -> Result<()> {
        self.ping_with(payload, max_retry, interval, timeout, |_| {})
    }

    /// [`ping`](Self::ping), reporting every attempt to `observe`.
    pub fn ping_with<F>(
        &self,
        payload: &[u8],
        max_retry: u32,
        interval: Duration,
        timeout: Duration,
        mut observe: F,
    ) -> Result<()>
    where
        F: FnMut(&PingAttempt),
    {
        let mut failures = 0u32;
        let mut seq = 0u64;
        while failures < max_retry {
            seq += 1;
            let started = Instant::now();
            let result = self.send(started + timeout, payload);
            match &result {
                Ok(_) => failures = 0,
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, retry = failures, "ping failed");
                }
            }

            let attempt = PingAttempt {
                seq,
                elapsed: started.elapsed(),
                result,
                failures,
            };
            observe(&attempt);

            if failures >= max_retry {
                return match attempt.result {
                    Err(err) => Err(err),
                    Ok(_) => Ok(()),
                };
            }
            if !self.shared.pause(interval) {
                return Err(PeerError::Closed);
            }
        }
        Ok(())
    }

    /// Stop reconnecting and close every pooled connection.
    ///
    /// Callers blocked in [`send`](Self::send) return [`PeerError::Closed`].
    pub fn close(&self) {
        {
            let mut closed = self.shared.closed.lock().unwrap_or_else(PoisonError::into_inner);
            if *closed {
                return;
            }
            *closed = true;
        }
        self.shared.wake.notify_all();
        let conns = self.shared.pool.close_all();
        let waiters = self.shared.pending.cancel_all();
        info!(
            address = %self.shared.config.address,
            conns,
            waiters,
            "client closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Number of live pooled connections.
    pub fn connection_count(&self) -> usize {
        self.shared.pool.size()
    }

    /// Number of sends currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(PeerError::Closed);
        }
        Ok(())
    }

    fn next_connection(&self) -> Result<Arc<Connection>> {
        self.shared.pool.next().ok_or(PeerError::NoConnection)
    }

    fn write_to(&self, conn: &Arc<Connection>, deadline: Instant, frame: &[u8]) -> Result<()> {
        if let Err(err) = conn.write(deadline, frame) {
            // A partial frame closes the connection; evict it before the
            // reader thread notices so no other sender picks it.
            if conn.is_closed() {
                self.shared.pool.remove(conn);
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn round_trip(&self, deadline: Instant, id: u32, frame: &[u8]) -> Result<Bytes> {
        let conn = self.next_connection()?;
        let slot = self.shared.pending.register(id);
        if let Err(err) = self.write_to(&conn, deadline, frame) {
            self.shared.pending.abandon(id);
            return Err(err);
        }
        self.await_reply(deadline, id, slot)
    }

    fn await_reply(&self, deadline: Instant, id: u32, slot: Receiver<Bytes>) -> Result<Bytes> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match slot.recv_timeout(remaining) {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => {
                if self.shared.pending.abandon(id) {
                    return Err(PeerError::DeadlineExceeded);
                }
                // Lost the race: the reader removed the slot and is delivering.
                slot.recv().map_err(|_| self.disconnected())
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    fn disconnected(&self) -> PeerError {
        if self.shared.is_closed() {
            PeerError::Closed
        } else {
            PeerError::DeadlineExceeded
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.shared.config.address)
            .field("connections", &self.shared.pool.size())
            .field("closed", &self.shared.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn rejects_empty_address() {
        let err = Client::new(ClientConfig::default()).expect_err("empty address should fail");
        assert!(matches!(err, PeerError::Config(msg) if msg.contains("address")));
    }

    #[test]
    fn rejects_empty_and_unknown_networks() {
        let err = Client::new(ClientConfig::new("127.0.0.1:1").with_network(""))
            .expect_err("empty network should fail");
        assert!(matches!(err, PeerError::Config(msg) if msg.contains("network")));

        let err = Client::new(ClientConfig::new("127.0.0.1:1").with_network("udp"))
            .expect_err("udp should fail");
        assert!(matches!(err, PeerError::Config(_)));
    }

    #[test]
    fn rejects_zero_connections() {
        let err = Client::new(ClientConfig::new("127.0.0.1:1").with_conn_count(0))
            .expect_err("zero connections should fail");
        assert!(matches!(err, PeerError::Config(msg) if msg.contains("connection count")));
    }

    #[test]
    fn send_without_connections_fails_fast() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .expect("bind should succeed")
            .local_addr()
            .expect("local addr")
            .port();
        let client = Client::new(ClientConfig::new(format!("127.0.0.1:{port}")))
            .expect("client should start");

        let started = Instant::now();
        let err = client
            .send(Instant::now() + Duration::from_secs(5), b"hello")
            .expect_err("send should fail without connections");
        assert!(matches!(err, PeerError::NoConnection));
        assert!(err.is_temporary());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.pending_count(), 0);
    }

    #[test]
    fn ready_times_out_without_server() {
        let port = TcpListener::bind("127.0.0.1:0")
            .expect("bind should succeed")
            .local_addr()
            .expect("local addr")
            .port();
        let client = Client::new(
            ClientConfig::new(format!("127.0.0.1:{port}"))
                .with_ready_poll_interval(Duration::from_millis(10)),
        )
        .expect("client should start");
        assert!(!client.ready(Instant::now() + Duration::from_millis(100)));
    }

    #[test]
    fn closed_client_rejects_sends() {
        let client = Client::new(ClientConfig::new("127.0.0.1:1")).expect("client should start");
        client.close();
        client.close();
        assert!(client.is_closed());
        assert!(!client.ready(Instant::now() + Duration::from_millis(50)));
        assert!(matches!(
            client.send(Instant::now() + Duration::from_secs(1), b"x"),
            Err(PeerError::Closed)
        ));
        assert!(matches!(
            client.send_no_reply(Instant::now() + Duration::from_secs(1), b"x"),
            Err(PeerError::Closed)
        ));
    }

    #[test]
    fn ping_with_zero_retries_sends_nothing() {
        let client = Client::new(ClientConfig::new("127.0.0.1:1")).expect("client should start");
        let mut attempts = 0;
        client
            .ping_with(b"ping", 0, Duration::ZERO, Duration::ZERO, |_| attempts += 1)
            .expect("zero retries should return immediately");
        assert_eq!(attempts, 0);
    }

    #[test]
    fn config_debug_hides_security_object() {
        let rendered = format!("{:?}", ClientConfig::new("example.com:9000"));
        assert!(rendered.contains("example.com:9000"));
        assert!(rendered.contains("secure: false"));
    }
}
