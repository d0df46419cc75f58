//! OSC server I/O loop
//!
//! A [`Server`] listens on one socket (UDP, TCP or a local datagram socket),
//! keeps a growing list of accepted or registered stream peers next to it,
//! and feeds every received frame to its [`Dispatcher`].
//!
//! ## Socket List
//!
//! ```text
//! index 0        the listening socket, never removed
//! index 1..n     stream peers, appended on accept, removed on close
//! ```
//!
//! Readiness is polled from the highest index down, and removing a peer
//! shifts only the entries above it, so a scan walking the list in reverse
//! is never disturbed by a removal.

pub mod thread;

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::{select_all, BoxFuture, FutureExt};
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket, UnixDatagram};
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

pub use thread::ServerThread;

use crate::config::ServerConfig;
use crate::dispatch::{
    BundleEndHandler, BundleStartHandler, Dispatcher, ErrorHandler, MethodHandler, MethodId,
};
use crate::error::{OscError, Result};
use crate::protocol::MAX_UDP_MSG_SIZE;
use crate::transport::{format_url, Address, FrameMode, StreamFramer};
use crate::types::Protocol;

/// Longest single readiness wait before the queue is looked at again
pub const MAX_POLL_WAIT: Duration = Duration::from_secs(100);

/// Queued messages due within this many seconds are dispatched right away
const QUEUE_DUE_SECS: f64 = 0.01;

enum ServerSocket {
    Udp(Arc<UdpSocket>),
    Listener(TcpListener),
    Stream(Arc<TcpStream>),
    Unix(Arc<UnixDatagram>),
}

/// One polled socket with its receive state
struct SocketEntry {
    socket: ServerSocket,
    /// Address of a stream peer, used as the source of its messages
    peer: Option<Address>,
    framer: StreamFramer,
    buf: BytesMut,
    /// Complete frames waiting for dispatch
    frames: VecDeque<Bytes>,
}

impl SocketEntry {
    fn new(socket: ServerSocket, peer: Option<Address>, max_msg_size: usize) -> Self {
        Self {
            socket,
            peer,
            framer: StreamFramer::new().with_max_size(max_msg_size),
            buf: BytesMut::new(),
            frames: VecDeque::new(),
        }
    }
}

enum Ready {
    Readable(usize),
    Accepted(TcpStream, SocketAddr),
    Failed(usize, io::Error),
}

/// An OSC server
pub struct Server {
    protocol: Protocol,
    sockets: Vec<SocketEntry>,
    dispatcher: Dispatcher,
    hostname: String,
    /// Bound port, or socket path for local sockets
    port: String,
    max_msg_size: usize,
    /// Socket file to remove on drop
    unix_path: Option<PathBuf>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("url", &self.url())
            .field("sockets", &self.sockets.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl Server {
    // === Construction ===

    /// Datagram server on `port`, or on a free port when `None`. A port
    /// starting with `/` creates a local-socket server at that path.
    pub async fn new(port: Option<&str>) -> Result<Self> {
        Self::with_protocol(port, Protocol::Udp).await
    }

    pub async fn with_protocol(port: Option<&str>, protocol: Protocol) -> Result<Self> {
        let port = port.unwrap_or("");
        let protocol = if port.starts_with('/') {
            Protocol::Unix
        } else {
            protocol
        };
        Self::with_config(&ServerConfig::default().with_protocol(protocol).with_port(port)).await
    }

    /// Datagram server that joins the multicast `group`. The membership
    /// interface is chosen by address through `ip`, or `iface` when that is
    /// an address.
    pub async fn multicast(
        group: &str,
        port: Option<&str>,
        iface: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Self> {
        let mut config = ServerConfig::default()
            .with_port(port.unwrap_or(""))
            .with_group(group);
        config.iface = iface.map(str::to_string);
        config.ip = ip.map(str::to_string);
        Self::with_config(&config).await
    }

    /// Server described by an `osc.*://` URL
    pub async fn from_url(url: &str) -> Result<Self> {
        Self::with_config(&ServerConfig::from_url(url)?).await
    }

    pub async fn with_config(config: &ServerConfig) -> Result<Self> {
        let max_msg_size = match config.protocol {
            Protocol::Udp => config.max_msg_size.min(MAX_UDP_MSG_SIZE),
            _ => config.max_msg_size,
        };
        let (socket, port, unix_path) = bind(config).await?;

        let mut dispatcher = Dispatcher::new();
        dispatcher.enable_coercion(config.coerce);
        dispatcher.enable_queue(config.queue, false);
        dispatcher.enable_introspection(config.introspection);

        let server = Self {
            protocol: config.protocol,
            sockets: vec![SocketEntry::new(socket, None, max_msg_size)],
            dispatcher,
            hostname: local_hostname(),
            port,
            max_msg_size,
            unix_path,
        };
        info!(url = %server.url(), "Server listening");
        Ok(server)
    }

    // === Accessors ===

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Bound port; `None` for local sockets
    pub fn port(&self) -> Option<u16> {
        self.port.parse().ok()
    }

    pub fn url(&self) -> String {
        format_url(self.protocol, &self.hostname, &self.port)
    }

    /// Local address of the listening socket
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.sockets.first()?.socket {
            ServerSocket::Udp(s) => s.local_addr().ok(),
            ServerSocket::Listener(l) => l.local_addr().ok(),
            _ => None,
        }
    }

    /// Number of polled sockets, the listening socket included
    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Sets the largest accepted frame and returns the value in effect.
    /// Zero only queries it; datagram servers are capped at 65535 bytes.
    pub fn set_max_msg_size(&mut self, size: usize) -> usize {
        if size == 0 {
            return self.max_msg_size;
        }
        self.max_msg_size = match self.protocol {
            Protocol::Udp => size.min(MAX_UDP_MSG_SIZE),
            _ => size,
        };
        for entry in &mut self.sockets {
            entry.framer.set_max_size(self.max_msg_size);
        }
        self.max_msg_size
    }

    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    // === Dispatch configuration ===

    pub fn add_method<H>(&mut self, path: Option<&str>, typespec: Option<&str>, handler: H) -> Result<MethodId>
    where
        H: MethodHandler + 'static,
    {
        self.dispatcher.add_method(path, typespec, handler)
    }

    pub fn del_method(&mut self, path: Option<&str>, typespec: Option<&str>) -> usize {
        self.dispatcher.del_method(path, typespec)
    }

    pub fn del_method_by_id(&mut self, id: MethodId) -> bool {
        self.dispatcher.del_method_by_id(id)
    }

    pub fn add_bundle_handlers(&mut self, start: BundleStartHandler, end: BundleEndHandler) {
        self.dispatcher.add_bundle_handlers(start, end);
    }

    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.dispatcher.set_error_handler(handler);
    }

    pub fn enable_coercion(&mut self, enable: bool) {
        self.dispatcher.enable_coercion(enable);
    }

    pub fn enable_queue(&mut self, enable: bool, dispatch_remaining: bool) {
        self.dispatcher.enable_queue(enable, dispatch_remaining);
    }

    pub fn enable_introspection(&mut self, enable: bool) {
        self.dispatcher.enable_introspection(enable);
    }

    pub fn events_pending(&self) -> bool {
        self.dispatcher.events_pending()
    }

    pub fn next_event_delay(&self) -> f64 {
        self.dispatcher.next_event_delay()
    }

    /// Dispatches an in-memory frame as if it had been received
    pub fn dispatch_data(&mut self, data: &[u8]) -> Result<usize> {
        self.dispatcher.dispatch_data(data, None)
    }

    // === Socket list ===

    fn add_socket(&mut self, entry: SocketEntry) {
        self.sockets.push(entry);
    }

    /// Removes a peer. Entries below `index` keep their positions.
    fn remove_socket(&mut self, index: usize) {
        if index == 0 || index >= self.sockets.len() {
            return;
        }
        let entry = self.sockets.remove(index);
        if let Some(peer) = entry.peer {
            debug!(peer = %peer.url(), "Removed peer socket");
        }
    }

    /// The listening datagram socket, shared with addresses sending from
    /// this server
    pub fn datagram_socket(&self) -> Option<Arc<UdpSocket>> {
        match &self.sockets.first()?.socket {
            ServerSocket::Udp(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Polls an outbound connection so replies on it are dispatched here
    pub fn register_stream(&mut self, stream: Arc<TcpStream>, peer: Address) {
        let known = self.sockets.iter().any(|e| match &e.socket {
            ServerSocket::Stream(s) => Arc::ptr_eq(s, &stream),
            _ => false,
        });
        if !known {
            self.add_socket(SocketEntry::new(ServerSocket::Stream(stream), Some(peer), self.max_msg_size));
        }
    }

    /// Stops polling a connection
    pub fn remove_stream(&mut self, stream: &Arc<TcpStream>) {
        let index = self.sockets.iter().position(|e| match &e.socket {
            ServerSocket::Stream(s) => Arc::ptr_eq(s, stream),
            _ => false,
        });
        if let Some(index) = index {
            self.remove_socket(index);
        }
    }

    // === I/O loop ===

    /// Waits up to `timeout` for a frame to receive or a queued message to
    /// fall due. New connections are accepted while waiting.
    pub async fn wait(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_buffered_frames() || self.queue_due() {
                return Ok(true);
            }
            let limit = self.wait_limit(Some(deadline));
            match tokio::time::timeout(limit, poll_ready(&self.sockets)).await {
                Err(_) => {
                    if Instant::now() >= deadline {
                        return Ok(self.queue_due());
                    }
                }
                Ok(ready) => match ready? {
                    Ready::Accepted(stream, peer) => self.accept(stream, peer),
                    Ready::Readable(_) => return Ok(true),
                    Ready::Failed(index, e) => self.socket_failed(index, e)?,
                },
            }
        }
    }

    /// Receives and dispatches one frame, or dispatches the queued
    /// messages that fell due first. Returns the frame size, or 0 after a
    /// queue dispatch.
    pub async fn recv(&mut self) -> Result<usize> {
        self.recv_until(None).await
    }

    /// Like [`Server::recv`], giving up after `timeout` with 0
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<usize> {
        self.recv_until(Some(Instant::now() + timeout)).await
    }

    async fn recv_until(&mut self, deadline: Option<Instant>) -> Result<usize> {
        loop {
            if self.queue_due() {
                self.dispatcher.dispatch_queued(false)?;
                return Ok(0);
            }
            if let Some(n) = self.dispatch_buffered() {
                return Ok(n);
            }

            let limit = self.wait_limit(deadline);
            match tokio::time::timeout(limit, poll_ready(&self.sockets)).await {
                Err(_) => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        if self.queue_due() {
                            self.dispatcher.dispatch_queued(false)?;
                        }
                        return Ok(0);
                    }
                }
                Ok(ready) => match ready? {
                    Ready::Accepted(stream, peer) => self.accept(stream, peer),
                    Ready::Readable(index) => {
                        if let Some(n) = self.read_socket(index) {
                            return Ok(n);
                        }
                    }
                    Ready::Failed(index, e) => self.socket_failed(index, e)?,
                },
            }
        }
    }

    fn queue_due(&self) -> bool {
        self.dispatcher.events_pending() && self.dispatcher.next_event_delay() < QUEUE_DUE_SECS
    }

    /// How long the next readiness wait may block
    fn wait_limit(&self, deadline: Option<Instant>) -> Duration {
        let mut limit = MAX_POLL_WAIT;
        if self.dispatcher.events_pending() {
            limit = limit.min(Duration::from_secs_f64(self.dispatcher.next_event_delay()));
        }
        if let Some(deadline) = deadline {
            limit = limit.min(deadline.saturating_duration_since(Instant::now()));
        }
        limit
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "Accepted connection");
        let stream = Arc::new(stream);
        let address = Address::from_stream_peer(stream.clone(), peer);
        self.add_socket(SocketEntry::new(ServerSocket::Stream(stream), Some(address), self.max_msg_size));
    }

    /// A failure on a peer drops only that peer; on the listening socket
    /// it is returned.
    fn socket_failed(&mut self, index: usize, err: io::Error) -> Result<()> {
        if index == 0 {
            return Err(err.into());
        }
        debug!(index, error = %err, "Peer socket failed");
        self.remove_socket(index);
        Ok(())
    }

    fn has_buffered_frames(&self) -> bool {
        self.sockets.iter().any(|e| !e.frames.is_empty())
    }

    /// Dispatches one frame already split off a stream
    fn dispatch_buffered(&mut self) -> Option<usize> {
        let index = self.sockets.iter().rposition(|e| !e.frames.is_empty())?;
        self.dispatch_frame(index)
    }

    fn dispatch_frame(&mut self, index: usize) -> Option<usize> {
        let entry = &mut self.sockets[index];
        let frame = entry.frames.pop_front()?;
        let source = entry.peer.clone();
        // failures were already reported to the error handler
        let _ = self.dispatcher.dispatch_data(&frame, source.as_ref());
        Some(frame.len())
    }

    /// Reads from a ready socket. Returns the size of the frame dispatched,
    /// or `None` when nothing complete arrived.
    fn read_socket(&mut self, index: usize) -> Option<usize> {
        match &self.sockets.get(index)?.socket {
            ServerSocket::Udp(socket) => {
                let socket = socket.clone();
                let mut buf = vec![0u8; self.max_msg_size + 1];
                match socket.try_recv_from(&mut buf) {
                    Ok((n, peer)) => {
                        if self.oversized(n) {
                            return None;
                        }
                        let source = Address::from_datagram_peer(socket, peer);
                        let _ = self.dispatcher.dispatch_data(&buf[..n], Some(&source));
                        Some(n)
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => {
                        debug!(error = %e, "Datagram receive failed");
                        None
                    }
                }
            }
            ServerSocket::Unix(socket) => {
                let socket = socket.clone();
                let mut buf = vec![0u8; self.max_msg_size + 1];
                match socket.try_recv_from(&mut buf) {
                    Ok((n, addr)) => {
                        if self.oversized(n) {
                            return None;
                        }
                        let source = Address::from_local_peer(socket, addr.as_pathname());
                        let _ = self.dispatcher.dispatch_data(&buf[..n], Some(&source));
                        Some(n)
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
                    Err(e) => {
                        debug!(error = %e, "Local receive failed");
                        None
                    }
                }
            }
            ServerSocket::Stream(stream) => {
                let stream = stream.clone();
                self.read_stream(index, &stream)
            }
            ServerSocket::Listener(_) => None,
        }
    }

    fn oversized(&self, n: usize) -> bool {
        if n <= self.max_msg_size {
            return false;
        }
        let err = OscError::TooBig {
            size: n,
            max: self.max_msg_size,
        };
        self.dispatcher.report(&err, None);
        true
    }

    fn read_stream(&mut self, index: usize, stream: &TcpStream) -> Option<usize> {
        let entry = &mut self.sockets[index];
        if let Err(e) = entry.framer.reserve_read(&mut entry.buf) {
            self.dispatcher.report(&e, None);
            self.remove_socket(index);
            return None;
        }
        match stream.try_read_buf(&mut entry.buf) {
            Ok(0) => {
                self.remove_socket(index);
                return None;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                debug!(error = %e, "Stream read failed");
                self.remove_socket(index);
                return None;
            }
        }

        loop {
            match entry.framer.decode(&mut entry.buf) {
                Ok(Some(frame)) => entry.frames.push_back(frame),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Dropping connection after framing error");
                    self.dispatcher.report(&e, None);
                    // frames decoded before the error are still delivered
                    let pending = std::mem::take(&mut entry.frames);
                    self.remove_socket(index);
                    return self.dispatch_detached(pending);
                }
            }
        }
        // replies go back in the framing the peer speaks
        if let (Some(peer), FrameMode::Slip(_)) = (entry.peer.as_mut(), entry.framer.mode()) {
            peer.set_stream_slip(true);
        }
        self.dispatch_frame(index)
    }

    fn dispatch_detached(&mut self, frames: VecDeque<Bytes>) -> Option<usize> {
        let mut total = None;
        for frame in frames {
            let _ = self.dispatcher.dispatch_data(&frame, None);
            total = Some(total.unwrap_or(0) + frame.len());
        }
        total
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(path) = self.unix_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

type ReadyWait<'a> = BoxFuture<'a, (usize, io::Result<Option<(TcpStream, SocketAddr)>>)>;

fn ready_wait(index: usize, socket: &ServerSocket) -> ReadyWait<'_> {
    match socket {
        ServerSocket::Udp(s) => async move { (index, s.readable().await.map(|_| None)) }.boxed(),
        ServerSocket::Stream(s) => async move { (index, s.readable().await.map(|_| None)) }.boxed(),
        ServerSocket::Unix(s) => async move { (index, s.readable().await.map(|_| None)) }.boxed(),
        ServerSocket::Listener(l) => async move { (index, l.accept().await.map(Some)) }.boxed(),
    }
}

/// Waits until one socket is readable or the listener accepts. Takes the
/// socket list alone since method handlers are `Send` but not `Sync`.
async fn poll_ready(sockets: &[SocketEntry]) -> Result<Ready> {
    if sockets.is_empty() {
        return Err(OscError::Internal("server has no sockets".into()));
    }
    // highest index first, so peers are served before new accepts
    let waits: Vec<ReadyWait<'_>> = sockets
        .iter()
        .enumerate()
        .rev()
        .map(|(i, entry)| ready_wait(i, &entry.socket))
        .collect();

    let ((index, result), _, _) = select_all(waits).await;
    Ok(match result {
        Ok(Some((stream, peer))) => Ready::Accepted(stream, peer),
        Ok(None) => Ready::Readable(index),
        Err(e) => Ready::Failed(index, e),
    })
}

/// Binds the listening socket, returning it with the bound port or path
async fn bind(config: &ServerConfig) -> Result<(ServerSocket, String, Option<PathBuf>)> {
    match config.protocol {
        Protocol::Udp => {
            let port = parse_port(&config.port)?;
            let socket =
                bind_datagram(port, config.group.is_some()).map_err(|e| bind_error(e, &config.port))?;
            if let Some(group) = &config.group {
                join_group(&socket, group, config.ip.as_deref().or(config.iface.as_deref()))?;
            }
            let port = socket.local_addr()?.port().to_string();
            Ok((ServerSocket::Udp(Arc::new(socket)), port, None))
        }
        Protocol::Tcp => {
            let port = parse_port(&config.port)?;
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
                .await
                .map_err(|e| bind_error(e, &config.port))?;
            let port = listener.local_addr()?.port().to_string();
            Ok((ServerSocket::Listener(listener), port, None))
        }
        Protocol::Unix => {
            if config.port.is_empty() {
                return Err(OscError::NoPort("local socket server needs a path".into()));
            }
            let socket = UnixDatagram::bind(&config.port).map_err(|e| bind_error(e, &config.port))?;
            Ok((
                ServerSocket::Unix(Arc::new(socket)),
                config.port.clone(),
                Some(PathBuf::from(&config.port)),
            ))
        }
    }
}

/// Binds a datagram socket on all IPv4 interfaces. Sockets of multicast
/// servers allow their port to be shared with other processes.
fn bind_datagram(port: u16, shared: bool) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(socket2::Protocol::UDP))?;
    if shared {
        socket.set_reuse_address(true)?;
        if let Err(e) = socket.set_reuse_port(true) {
            debug!(error = %e, "SO_REUSEPORT not available");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    UdpSocket::from_std(socket.into())
}

fn parse_port(port: &str) -> Result<u16> {
    if port.is_empty() {
        return Ok(0);
    }
    port.parse()
        .map_err(|_| OscError::NoPort(format!("invalid port {:?}", port)))
}

fn bind_error(err: io::Error, port: &str) -> OscError {
    if err.kind() == io::ErrorKind::AddrInUse {
        OscError::NoPort(format!("{} is already in use", port))
    } else {
        err.into()
    }
}

fn join_group(socket: &UdpSocket, group: &str, iface: Option<&str>) -> Result<()> {
    let group: IpAddr = group
        .parse()
        .map_err(|_| OscError::Config(format!("invalid multicast group {:?}", group)))?;
    let IpAddr::V4(group) = group else {
        return Err(OscError::Config(format!("unsupported multicast group {}", group)));
    };
    let iface = match iface {
        Some(s) => s
            .parse::<Ipv4Addr>()
            .map_err(|_| OscError::Config(format!("interface must be given by its address, got {:?}", s)))?,
        None => Ipv4Addr::UNSPECIFIED,
    };
    socket.join_multicast_v4(group, iface)?;
    debug!(%group, %iface, "Joined multicast group");
    Ok(())
}

fn local_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerResult;
    use crate::protocol::{Argument, Bundle, Message};
    use crate::transport::framing::{length_prefix, slip_encode};
    use crate::transport::ClientPool;
    use crate::types::Timetag;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type Seen = Arc<Mutex<Vec<String>>>;

    fn record(server: &mut Server, path: &str, types: Option<&str>) -> Seen {
        let seen = Seen::default();
        let sink = seen.clone();
        server
            .add_method(Some(path), types, move |p: &str, _: &str, args: &[Argument], _: &Message| {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                sink.lock().push(format!("{} {}", p, rendered.join(" ")));
                HandlerResult::Handled
            })
            .unwrap();
        seen
    }

    async fn recv_until_seen(server: &mut Server, seen: &Seen, count: usize) {
        for _ in 0..50 {
            if seen.lock().len() >= count {
                return;
            }
            server.recv_timeout(Duration::from_millis(100)).await.unwrap();
        }
        panic!("expected {} messages, got {:?}", count, seen.lock());
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let mut server = Server::new(None).await.unwrap();
        let seen = record(&mut server, "/test", Some("is"));
        let port = server.port().unwrap().to_string();
        assert!(server.url().starts_with("osc.udp://"));
        assert!(server.url().ends_with(&format!(":{}/", port)));

        let pool = ClientPool::new();
        let mut addr = Address::new(Some("127.0.0.1"), &port);
        addr.send(&pool, "/other", [Argument::Int32(1)]).await.unwrap();
        addr.send(&pool, "/test", [Argument::Int32(42), Argument::from("hello")]).await.unwrap();

        recv_until_seen(&mut server, &seen, 1).await;
        assert_eq!(*seen.lock(), vec!["/test 42 \"hello\""]);
    }

    #[tokio::test]
    async fn test_recv_timeout_returns_zero() {
        let mut server = Server::new(None).await.unwrap();
        let started = std::time::Instant::now();
        assert_eq!(server.recv_timeout(Duration::from_millis(50)).await.unwrap(), 0);
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert!(!server.wait(Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_reported() {
        let mut server = Server::new(None).await.unwrap();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        server.set_error_handler(Some(Box::new(move |code: i32, _: &str, path: Option<&str>| {
            sink.lock().push((code, path.map(str::to_string)));
        })));
        let seen = record(&mut server, "/ok", None);

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = ("127.0.0.1", server.port().unwrap());
        client.send_to(b"/bad\0\0\0\0x\0\0\0", target).await.unwrap();
        client.send_to(&Message::new().serialize("/ok").unwrap(), target).await.unwrap();

        recv_until_seen(&mut server, &seen, 1).await;
        assert_eq!(errors.lock()[0], (9910, Some("/bad".to_string())));
    }

    #[tokio::test]
    async fn test_tcp_length_prefixed_and_peer_close() {
        let mut server = Server::with_protocol(None, Protocol::Tcp).await.unwrap();
        let seen = record(&mut server, "/t", None);
        let port = server.port().unwrap().to_string();

        let pool = ClientPool::new();
        let mut addr = Address::with_protocol(Protocol::Tcp, Some("127.0.0.1"), &port);
        addr.send_message(&pool, "/t", &Message::new().with_arg(1i32)).await.unwrap();
        addr.send_message(&pool, "/t", &Message::new().with_arg(2i32)).await.unwrap();

        recv_until_seen(&mut server, &seen, 2).await;
        assert_eq!(*seen.lock(), vec!["/t 1", "/t 2"]);
        assert_eq!(server.socket_count(), 2);

        drop(addr);
        for _ in 0..20 {
            server.recv_timeout(Duration::from_millis(50)).await.unwrap();
            if server.socket_count() == 1 {
                break;
            }
        }
        assert_eq!(server.socket_count(), 1);
    }

    #[tokio::test]
    async fn test_tcp_slip_split_across_writes() {
        let mut server = Server::with_protocol(None, Protocol::Tcp).await.unwrap();
        let seen = record(&mut server, "/s", None);
        let port = server.port().unwrap();

        let mut encoded = BytesMut::new();
        slip_encode(&Message::new().with_arg(7i32).serialize("/s").unwrap(), &mut encoded);
        slip_encode(&Message::new().with_arg(8i32).serialize("/s").unwrap(), &mut encoded);

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (head, tail) = encoded.split_at(5);
        client.write_all(head).await.unwrap();
        client.flush().await.unwrap();
        server.recv_timeout(Duration::from_millis(100)).await.unwrap();
        client.write_all(tail).await.unwrap();

        recv_until_seen(&mut server, &seen, 2).await;
        assert_eq!(*seen.lock(), vec!["/s 7", "/s 8"]);
    }

    fn echo_to_source(server: &mut Server) -> Seen {
        let seen = Seen::default();
        let sink = seen.clone();
        server
            .add_method(Some("/echo"), None, move |p: &str, _: &str, args: &[Argument], msg: &Message| {
                if let Some(src) = msg.source() {
                    let mut reply_to = src.clone();
                    reply_to
                        .try_send_message("/echoed", &Message::from_args(args.to_vec()))
                        .unwrap();
                }
                sink.lock().push(p.to_string());
                HandlerResult::Handled
            })
            .unwrap();
        seen
    }

    #[tokio::test]
    async fn test_tcp_handler_replies_to_peer() {
        let mut server = Server::with_protocol(None, Protocol::Tcp).await.unwrap();
        let seen = echo_to_source(&mut server);
        let port = server.port().unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framed = BytesMut::new();
        length_prefix(&Message::new().with_arg(9i32).serialize("/echo").unwrap(), &mut framed);
        client.write_all(&framed).await.unwrap();
        recv_until_seen(&mut server, &seen, 1).await;

        let mut header = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut header))
            .await
            .unwrap()
            .unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(header) as usize];
        client.read_exact(&mut body).await.unwrap();

        let (path, reply) = Message::decode(&body).unwrap();
        assert_eq!(path, "/echoed");
        assert_eq!(reply.args()[0].as_i32(), Some(9));
    }

    #[tokio::test]
    async fn test_tcp_handler_replies_with_slip_to_slip_peer() {
        let mut server = Server::with_protocol(None, Protocol::Tcp).await.unwrap();
        let seen = echo_to_source(&mut server);
        let port = server.port().unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framed = BytesMut::new();
        slip_encode(&Message::new().with_arg(4i32).serialize("/echo").unwrap(), &mut framed);
        client.write_all(&framed).await.unwrap();
        recv_until_seen(&mut server, &seen, 1).await;

        let mut expected = BytesMut::new();
        slip_encode(&Message::new().with_arg(4i32).serialize("/echoed").unwrap(), &mut expected);
        let mut got = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut got))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&got[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_oversized_stream_frame_drops_only_that_peer() {
        let mut server = Server::with_config(
            &ServerConfig::default()
                .with_protocol(Protocol::Tcp)
                .with_max_msg_size(64),
        )
        .await
        .unwrap();
        let seen = record(&mut server, "/ok", None);
        let port = server.port().unwrap();

        let mut bad = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        bad.write_all(&[0, 0, 1, 0]).await.unwrap();

        let mut good = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut framed = BytesMut::new();
        length_prefix(&Message::new().serialize("/ok").unwrap(), &mut framed);
        good.write_all(&framed).await.unwrap();

        recv_until_seen(&mut server, &seen, 1).await;
        for _ in 0..10 {
            server.recv_timeout(Duration::from_millis(20)).await.unwrap();
        }
        assert_eq!(server.socket_count(), 2);
    }

    #[tokio::test]
    async fn test_unix_socket_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc.sock");
        let path_str = path.to_str().unwrap().to_string();

        let mut server = Server::new(Some(path_str.as_str())).await.unwrap();
        assert_eq!(server.protocol(), Protocol::Unix);
        assert_eq!(server.url(), format!("osc.unix://{}", path_str));
        assert_eq!(server.port(), None);
        let seen = record(&mut server, "/u", None);

        let pool = ClientPool::new();
        let mut addr = Address::from_url(&server.url()).unwrap();
        addr.send_message(&pool, "/u", &Message::new().with_arg(3i32)).await.unwrap();

        recv_until_seen(&mut server, &seen, 1).await;
        drop(server);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_queued_bundle_dispatched_when_due() {
        let mut server = Server::new(None).await.unwrap();
        let seen = record(&mut server, "/later", None);

        let bundle = Bundle::new(Timetag::after(Duration::from_millis(200)));
        bundle.add_message("/later", Message::new()).unwrap();
        server.dispatch_data(&bundle.serialize().unwrap()).unwrap();
        assert!(server.events_pending());
        assert!(seen.lock().is_empty());
        assert!(server.next_event_delay() <= 0.2);

        assert!(server.wait(Duration::from_secs(2)).await.unwrap());
        assert_eq!(server.recv_timeout(Duration::from_secs(2)).await.unwrap(), 0);
        assert_eq!(seen.lock().len(), 1);
        assert!(!server.events_pending());
    }

    #[tokio::test]
    async fn test_reply_through_sending_server() {
        let mut a = Server::new(None).await.unwrap();
        let mut b = Server::new(None).await.unwrap();
        let a_port = a.port().unwrap();

        let sources = Arc::new(Mutex::new(Vec::new()));
        let sink = sources.clone();
        b.add_method(Some("/ping"), None, move |_: &str, _: &str, _: &[Argument], msg: &Message| {
            if let Some(src) = msg.source() {
                sink.lock().push(src.port().to_string());
                let mut reply_to = src.clone();
                reply_to.try_send_message("/pong", &Message::new()).unwrap();
            }
            HandlerResult::Handled
        })
        .unwrap();
        let pongs = record(&mut a, "/pong", None);

        let pool = ClientPool::new();
        let mut to_b = Address::new(Some("127.0.0.1"), &b.port().unwrap().to_string());
        to_b.send_message_from(&pool, Some(&mut a), "/ping", &Message::new())
            .await
            .unwrap();

        b.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(*sources.lock(), vec![a_port.to_string()]);
        recv_until_seen(&mut a, &pongs, 1).await;
    }

    #[tokio::test]
    async fn test_busy_port_is_no_port() {
        let first = Server::new(None).await.unwrap();
        let port = first.port().unwrap().to_string();
        let err = Server::new(Some(port.as_str())).await.unwrap_err();
        assert!(matches!(err, OscError::NoPort(_)));
        assert_eq!(err.code(), 9904);
    }

    #[tokio::test]
    async fn test_multicast_sockets_share_a_port() {
        let first = bind_datagram(0, true).unwrap();
        let port = first.local_addr().unwrap().port();
        let second = bind_datagram(port, true).unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);

        let err = bind_datagram(port, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn test_set_max_msg_size() {
        let mut udp = Server::new(None).await.unwrap();
        assert_eq!(udp.set_max_msg_size(0), 65535);
        assert_eq!(udp.set_max_msg_size(1 << 20), 65535);
        assert_eq!(udp.set_max_msg_size(512), 512);

        let mut tcp = Server::with_protocol(None, Protocol::Tcp).await.unwrap();
        assert_eq!(tcp.set_max_msg_size(1 << 20), 1 << 20);
        assert_eq!(tcp.max_msg_size(), 1 << 20);
    }

    #[tokio::test]
    async fn test_from_url_and_config_flags() {
        let server = Server::from_url("osc.tcp://localhost:0/").await.unwrap();
        assert_eq!(server.protocol(), Protocol::Tcp);
        assert!(server.local_addr().is_some());

        let server = Server::with_config(&ServerConfig::default().with_queue(false).with_introspection(true))
            .await
            .unwrap();
        assert!(!server.dispatcher().queue_enabled());
        assert!(server.dispatcher().introspection_enabled());
        assert!(server.datagram_socket().is_some());
    }
}
