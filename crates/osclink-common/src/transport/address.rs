//! Transport endpoints
//!
//! An [`Address`] names a destination (protocol, host, port or socket path)
//! and owns whatever is needed to reach it: the resolved socket addresses,
//! cached lazily on first send, and for stream and local transports the
//! connected socket. Send failures are returned and also recorded on the
//! address, see [`Address::errno`] and [`Address::errstr`].

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use bytes::BytesMut;
use socket2::{SockAddr, SockRef};
use tokio::net::{lookup_host, TcpStream, UdpSocket, UnixDatagram};
use tracing::{debug, warn};

use super::framing::{length_prefix, slip_encode};
use super::pool::ClientPool;
use super::socket::{try_write_frame, write_all_shared, SocketHandle};
use super::url::{format_url, url_hostname, url_path, url_port, url_protocol, url_protocol_id};
use crate::config::AddressOptions;
use crate::error::{OscError, Result};
use crate::protocol::{Argument, Bundle, Message, MAX_UDP_MSG_SIZE};
use crate::server::Server;
use crate::types::{Protocol, Timetag};

/// A destination for OSC messages
#[derive(Debug, Clone)]
pub struct Address {
    protocol: Protocol,
    host: String,
    /// Port number or service, or the socket path for local sockets
    port: String,
    ttl: Option<u32>,
    /// Local address outbound datagrams are sent from
    iface: Option<IpAddr>,
    tcp_nodelay: bool,
    slip: bool,
    /// Candidate socket addresses, the last one that worked first
    resolved: Vec<SocketAddr>,
    socket: Option<SocketHandle>,
    errnum: i32,
    errstr: Option<String>,
}

impl Address {
    /// UDP destination. A missing host means `localhost`.
    pub fn new(host: Option<&str>, port: &str) -> Self {
        Self::with_protocol(Protocol::Udp, host, port)
    }

    /// Destination using `protocol`. For local sockets `port` is the path.
    pub fn with_protocol(protocol: Protocol, host: Option<&str>, port: &str) -> Self {
        let host = match protocol {
            Protocol::Unix => "localhost".to_string(),
            _ => host.unwrap_or("localhost").to_string(),
        };
        Self {
            protocol,
            host,
            port: port.to_string(),
            ttl: None,
            iface: None,
            tcp_nodelay: false,
            slip: false,
            resolved: Vec::new(),
            socket: None,
            errnum: 0,
            errstr: None,
        }
    }

    /// Parses `osc.udp://host:port/`, `osc.tcp://host:port/` or
    /// `osc.unix:///path`
    pub fn from_url(url: &str) -> Result<Self> {
        match url_protocol_id(url) {
            Some(Protocol::Unix) => {
                let path = url_path(url)
                    .ok_or_else(|| OscError::Config(format!("no socket path in {}", url)))?;
                Ok(Self::with_protocol(Protocol::Unix, None, &path))
            }
            Some(protocol) => {
                let host = url_hostname(url);
                let port = url_port(url).unwrap_or_default();
                Ok(Self::with_protocol(protocol, host.as_deref(), &port))
            }
            None => Err(OscError::UnknownProtocol(
                url_protocol(url).unwrap_or_else(|| url.to_string()),
            )),
        }
    }

    /// Address of a datagram peer, replying through the receiving socket
    pub(crate) fn from_datagram_peer(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        let mut addr = Self::with_protocol(Protocol::Udp, Some(&peer.ip().to_string()), &peer.port().to_string());
        addr.resolved = vec![peer];
        addr.socket = Some(SocketHandle::Udp(socket));
        addr
    }

    /// Address of a connected stream peer
    pub(crate) fn from_stream_peer(stream: Arc<TcpStream>, peer: SocketAddr) -> Self {
        let mut addr = Self::with_protocol(Protocol::Tcp, Some(&peer.ip().to_string()), &peer.port().to_string());
        addr.resolved = vec![peer];
        addr.socket = Some(SocketHandle::Tcp(stream));
        addr
    }

    /// Address of a local-socket peer. Unbound peers have an empty path.
    pub(crate) fn from_local_peer(socket: Arc<UnixDatagram>, path: Option<&Path>) -> Self {
        let path = path.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        let mut addr = Self::with_protocol(Protocol::Unix, None, &path);
        addr.socket = Some(SocketHandle::Unix(socket));
        addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn hostname(&self) -> &str {
        &self.host
    }

    /// Port, or socket path for local sockets
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn url(&self) -> String {
        format_url(self.protocol, &self.host, &self.port)
    }

    /// Multicast TTL, datagram addresses only
    pub fn set_ttl(&mut self, ttl: u32) {
        if self.protocol == Protocol::Udp {
            self.ttl = Some(ttl);
        }
    }

    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    /// Enables TCP_NODELAY on the stream, returning the previous setting
    pub fn set_tcp_nodelay(&mut self, enable: bool) -> bool {
        let previous = std::mem::replace(&mut self.tcp_nodelay, enable);
        if let Some(SocketHandle::Tcp(stream)) = &self.socket {
            if let Err(e) = stream.set_nodelay(enable) {
                debug!(error = %e, "Failed to update TCP_NODELAY");
            }
        }
        previous
    }

    /// Frames stream sends with SLIP instead of a length prefix, returning
    /// the previous setting
    pub fn set_stream_slip(&mut self, enable: bool) -> bool {
        std::mem::replace(&mut self.slip, enable)
    }

    /// Selects the outbound interface for datagrams by its local address.
    ///
    /// `iface` is accepted when it is itself an address; `ip` wins when both
    /// are given. Passing neither clears the selection.
    pub fn set_iface(&mut self, iface: Option<&str>, ip: Option<&str>) -> Result<()> {
        let chosen = ip.or(iface);
        let parsed = match chosen {
            None => None,
            Some(s) => Some(s.parse::<IpAddr>().map_err(|_| {
                OscError::Config(format!("interface must be given by its address, got {:?}", s))
            })?),
        };
        if parsed != self.iface {
            self.iface = parsed;
            if matches!(self.socket, Some(SocketHandle::Udp(_))) {
                self.socket = None;
            }
        }
        Ok(())
    }

    pub fn iface(&self) -> Option<IpAddr> {
        self.iface
    }

    /// Applies configured options in one go
    pub fn apply_options(&mut self, options: &AddressOptions) -> Result<()> {
        if let Some(ttl) = options.ttl {
            self.set_ttl(ttl);
        }
        self.set_tcp_nodelay(options.tcp_nodelay);
        self.set_stream_slip(options.slip);
        self.set_iface(options.iface.as_deref(), None)
    }

    /// Error code of the last failed operation, 0 after a success
    pub fn errno(&self) -> i32 {
        self.errnum
    }

    /// Message of the last failed operation
    pub fn errstr(&self) -> &str {
        match &self.errstr {
            Some(s) => s,
            None if self.errnum == 0 => "Success",
            None => "unknown error",
        }
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                self.errnum = 0;
                self.errstr = None;
            }
            Err(e) => {
                self.errnum = e.code();
                self.errstr = Some(e.to_string());
            }
        }
        result
    }

    /// Resolves the host name, caching the candidates for later sends
    pub async fn resolve(&mut self) -> Result<()> {
        let result = self.lookup().await;
        self.record(result)
    }

    async fn lookup(&mut self) -> Result<()> {
        if self.protocol == Protocol::Unix {
            return Ok(());
        }
        let resolve_err = |reason: String| OscError::Resolve {
            host: self.host.clone(),
            port: self.port.clone(),
            reason,
        };
        let port: u16 = self
            .port
            .parse()
            .map_err(|_| resolve_err(format!("invalid port {:?}", self.port)))?;
        let candidates: Vec<SocketAddr> = lookup_host((self.host.as_str(), port))
            .await
            .map_err(|e| resolve_err(e.to_string()))?
            .collect();
        if candidates.is_empty() {
            return Err(resolve_err("no addresses found".into()));
        }
        debug!(host = %self.host, port, count = candidates.len(), "Resolved address");
        self.resolved = candidates;
        Ok(())
    }

    /// Resolved candidates, empty until the first send or [`Address::resolve`]
    pub fn resolved(&self) -> &[SocketAddr] {
        &self.resolved
    }

    /// Sends a message to `path`
    pub async fn send_message(&mut self, pool: &ClientPool, path: &str, msg: &Message) -> Result<usize> {
        self.send_message_from(pool, None, path, msg).await
    }

    /// Sends a message, originating from `from`'s socket when possible.
    ///
    /// Datagrams leave through the server's socket so replies reach it.
    /// New stream connections are registered with the server so it
    /// dispatches whatever the peer sends back.
    pub async fn send_message_from(
        &mut self,
        pool: &ClientPool,
        from: Option<&mut Server>,
        path: &str,
        msg: &Message,
    ) -> Result<usize> {
        let data = match msg.serialize(path) {
            Ok(data) => data,
            Err(e) => return self.record(Err(e)),
        };
        self.deliver(pool, from, &data).await
    }

    pub async fn send_bundle(&mut self, pool: &ClientPool, bundle: &Bundle) -> Result<usize> {
        self.send_bundle_from(pool, None, bundle).await
    }

    pub async fn send_bundle_from(
        &mut self,
        pool: &ClientPool,
        from: Option<&mut Server>,
        bundle: &Bundle,
    ) -> Result<usize> {
        let data = match bundle.serialize() {
            Ok(data) => data,
            Err(e) => return self.record(Err(e)),
        };
        self.deliver(pool, from, &data).await
    }

    /// Sends `msg` inside a bundle carrying `timetag`. An immediate timetag
    /// sends the bare message.
    pub async fn send_timestamped(
        &mut self,
        pool: &ClientPool,
        timetag: Timetag,
        path: &str,
        msg: Message,
    ) -> Result<usize> {
        if timetag.is_immediate() {
            return self.send_message(pool, path, &msg).await;
        }
        let bundle = Bundle::new(timetag);
        bundle.add_message(path, msg)?;
        self.send_bundle(pool, &bundle).await
    }

    /// Builds a message from `args` and sends it
    pub async fn send<I>(&mut self, pool: &ClientPool, path: &str, args: I) -> Result<usize>
    where
        I: IntoIterator<Item = Argument>,
    {
        let msg = Message::from_args(args.into_iter().collect());
        self.send_message(pool, path, &msg).await
    }

    /// Sends without waiting, through a socket the address already holds.
    /// This is how handlers reply to the source of a message from inside
    /// dispatch: datagram peers get a datagram from the receiving socket,
    /// stream peers get a frame on the accepted connection.
    pub fn try_send_message(&mut self, path: &str, msg: &Message) -> Result<usize> {
        let result = msg.serialize(path).and_then(|data| self.try_send_data(&data));
        self.record(result)
    }

    // The socket is written directly: tokio's own `try_*` calls refuse with
    // `WouldBlock` until the runtime has polled the socket for writability.
    fn try_send_data(&self, data: &[u8]) -> Result<usize> {
        if data.len() > MAX_UDP_MSG_SIZE && self.protocol == Protocol::Udp {
            return Err(OscError::TooBig {
                size: data.len(),
                max: MAX_UDP_MSG_SIZE,
            });
        }
        match (&self.socket, self.resolved.first()) {
            (Some(SocketHandle::Udp(socket)), Some(target)) => {
                Ok(SockRef::from(&**socket).send_to(data, &SockAddr::from(*target))?)
            }
            (Some(SocketHandle::Unix(socket)), _) if !self.port.is_empty() => {
                let target = SockAddr::unix(&self.port)?;
                Ok(SockRef::from(&**socket).send_to(data, &target)?)
            }
            (Some(SocketHandle::Tcp(stream)), _) => {
                let mut framed = BytesMut::new();
                if self.slip {
                    slip_encode(data, &mut framed);
                } else {
                    length_prefix(data, &mut framed);
                }
                try_write_frame(stream, &framed)?;
                Ok(data.len())
            }
            _ => Err(OscError::Internal(
                "address has no connected socket for a non-blocking send".into(),
            )),
        }
    }

    /// Sends `data`, retrying once on stream transports so a connection
    /// closed by the peer gets re-established.
    async fn deliver(&mut self, pool: &ClientPool, mut from: Option<&mut Server>, data: &[u8]) -> Result<usize> {
        let first = self.send_data(pool, from.as_deref_mut(), data).await;
        let result = match first {
            Err(e) if self.protocol.is_stream() && !matches!(e, OscError::TooBig { .. } | OscError::Resolve { .. }) => {
                debug!(url = %self.url(), error = %e, "Stream send failed, reconnecting");
                self.send_data(pool, from, data).await
            }
            other => other,
        };
        self.record(result)
    }

    async fn send_data(&mut self, pool: &ClientPool, from: Option<&mut Server>, data: &[u8]) -> Result<usize> {
        match self.protocol {
            Protocol::Udp => self.send_datagram(pool, from, data).await,
            Protocol::Tcp => self.send_stream(from, data).await,
            Protocol::Unix => self.send_local(data).await,
        }
    }

    async fn send_datagram(&mut self, pool: &ClientPool, from: Option<&mut Server>, data: &[u8]) -> Result<usize> {
        if data.len() > MAX_UDP_MSG_SIZE {
            return Err(OscError::TooBig {
                size: data.len(),
                max: MAX_UDP_MSG_SIZE,
            });
        }
        if self.resolved.is_empty() {
            self.lookup().await?;
        }

        let fixed = match from.and_then(|server| server.datagram_socket()) {
            Some(socket) => Some(socket),
            None => match (&self.socket, self.iface) {
                (Some(SocketHandle::Udp(socket)), _) => Some(socket.clone()),
                (_, Some(ip)) => {
                    let socket = Arc::new(UdpSocket::bind((ip, 0)).await?);
                    self.socket = Some(SocketHandle::Udp(socket.clone()));
                    Some(socket)
                }
                _ => None,
            },
        };

        let mut last_err = None;
        for (i, target) in self.resolved.clone().into_iter().enumerate() {
            let socket = match &fixed {
                Some(socket) => socket.clone(),
                None => pool.udp_socket(target.is_ipv6()).await?,
            };
            if let Err(e) = self.apply_datagram_options(&socket, &target) {
                debug!(error = %e, %target, "Failed to set datagram options");
            }
            match socket.send_to(data, target).await {
                Ok(n) => {
                    if i > 0 {
                        self.resolved.rotate_left(i);
                    }
                    return Ok(n);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(OscError::from)
            .unwrap_or_else(|| OscError::Internal("no candidate addresses".into())))
    }

    fn apply_datagram_options(&self, socket: &UdpSocket, target: &SocketAddr) -> std::io::Result<()> {
        if let SocketAddr::V4(v4) = target {
            if v4.ip().is_broadcast() {
                socket.set_broadcast(true)?;
            }
            if let (Some(ttl), true) = (self.ttl, v4.ip().is_multicast()) {
                socket.set_multicast_ttl_v4(ttl)?;
            }
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<TcpStream> {
        if self.resolved.is_empty() {
            self.lookup().await?;
        }
        let mut last_err = None;
        for (i, target) in self.resolved.clone().into_iter().enumerate() {
            match TcpStream::connect(target).await {
                Ok(stream) => {
                    if self.tcp_nodelay {
                        stream.set_nodelay(true)?;
                    }
                    if i > 0 {
                        self.resolved.rotate_left(i);
                    }
                    debug!(%target, "Connected stream");
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .map(OscError::from)
            .unwrap_or_else(|| OscError::Internal("no candidate addresses".into())))
    }

    async fn send_stream(&mut self, mut from: Option<&mut Server>, data: &[u8]) -> Result<usize> {
        let stream = match &self.socket {
            Some(SocketHandle::Tcp(stream)) => stream.clone(),
            _ => {
                let stream = Arc::new(self.connect().await?);
                self.socket = Some(SocketHandle::Tcp(stream.clone()));
                if let Some(server) = from.as_deref_mut() {
                    server.register_stream(stream.clone(), self.clone());
                }
                stream
            }
        };

        let mut framed = BytesMut::new();
        if self.slip {
            slip_encode(data, &mut framed);
        } else {
            length_prefix(data, &mut framed);
        }

        match write_all_shared(&stream, &framed).await {
            Ok(_) => Ok(data.len()),
            Err(e) => {
                warn!(url = %self.url(), error = %e, "Stream send failed");
                self.socket = None;
                if let Some(server) = from {
                    server.remove_stream(&stream);
                }
                Err(e.into())
            }
        }
    }

    async fn send_local(&mut self, data: &[u8]) -> Result<usize> {
        if self.port.is_empty() {
            return Err(OscError::NoPort("local peer has no socket path".into()));
        }
        let socket = match &self.socket {
            Some(SocketHandle::Unix(socket)) => socket.clone(),
            _ => {
                let socket = Arc::new(UnixDatagram::unbound()?);
                self.socket = Some(SocketHandle::Unix(socket.clone()));
                socket
            }
        };
        match socket.send_to(data, &self.port).await {
            Ok(n) => Ok(n),
            Err(e) => {
                self.socket = None;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_from_url() {
        let a = Address::from_url("osc.udp://example.com:9000/").unwrap();
        assert_eq!(a.protocol(), Protocol::Udp);
        assert_eq!(a.hostname(), "example.com");
        assert_eq!(a.port(), "9000");
        assert_eq!(a.url(), "osc.udp://example.com:9000/");

        let t = Address::from_url("osc.tcp://[::1]:7000").unwrap();
        assert_eq!(t.hostname(), "::1");
        assert_eq!(t.url(), "osc.tcp://[::1]:7000/");

        let u = Address::from_url("osc.unix:///tmp/osc.sock").unwrap();
        assert_eq!(u.protocol(), Protocol::Unix);
        assert_eq!(u.port(), "/tmp/osc.sock");
        assert_eq!(u.url(), "osc.unix:///tmp/osc.sock");

        let d = Address::from_url("osc.udp://:9000").unwrap();
        assert_eq!(d.hostname(), "localhost");

        assert!(matches!(
            Address::from_url("osc.sctp://h:1"),
            Err(OscError::UnknownProtocol(p)) if p == "sctp"
        ));
    }

    #[test]
    fn test_flags_return_previous() {
        let mut a = Address::with_protocol(Protocol::Tcp, None, "9000");
        assert!(!a.set_tcp_nodelay(true));
        assert!(a.set_tcp_nodelay(false));
        assert!(!a.set_stream_slip(true));
        assert!(a.set_stream_slip(true));
    }

    #[test]
    fn test_ttl_only_for_datagrams() {
        let mut udp = Address::new(None, "9000");
        udp.set_ttl(4);
        assert_eq!(udp.ttl(), Some(4));

        let mut tcp = Address::with_protocol(Protocol::Tcp, None, "9000");
        tcp.set_ttl(4);
        assert_eq!(tcp.ttl(), None);
    }

    #[test]
    fn test_set_iface() {
        let mut a = Address::new(None, "9000");
        a.set_iface(Some("eth0"), Some("127.0.0.1")).unwrap();
        assert_eq!(a.iface(), Some("127.0.0.1".parse().unwrap()));
        assert!(a.set_iface(Some("eth0"), None).is_err());
        a.set_iface(None, None).unwrap();
        assert_eq!(a.iface(), None);
    }

    #[tokio::test]
    async fn test_resolve_failure_is_recorded() {
        let mut a = Address::new(Some("localhost"), "not-a-port");
        assert!(a.resolve().await.is_err());
        assert_eq!(a.errno(), 9920);
        assert!(a.errstr().contains("not-a-port"));

        let mut ok = Address::new(Some("127.0.0.1"), "9");
        ok.resolve().await.unwrap();
        assert_eq!(ok.errno(), 0);
        assert_eq!(ok.errstr(), "Success");
        assert_eq!(ok.resolved()[0], "127.0.0.1:9".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_udp_send() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port().to_string();
        let pool = ClientPool::new();

        let mut a = Address::new(Some("127.0.0.1"), &port);
        let msg = Message::new().with_arg(1i32);
        let sent = a.send_message(&pool, "/x", &msg).await.unwrap();
        assert_eq!(sent, msg.length("/x"));

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        let (path, got) = Message::decode(&buf[..n]).unwrap();
        assert_eq!(path, "/x");
        assert_eq!(got.args()[0].as_i32(), Some(1));
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_refused() {
        let pool = ClientPool::new();
        let mut a = Address::new(Some("127.0.0.1"), "9");
        let msg = Message::new().with_arg(vec![0u8; MAX_UDP_MSG_SIZE]);
        let err = a.send_message(&pool, "/big", &msg).await.unwrap_err();
        assert!(matches!(err, OscError::TooBig { .. }));
        assert_eq!(a.errno(), 9905);
    }

    #[tokio::test]
    async fn test_tcp_send_length_prefixed_and_slip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let pool = ClientPool::new();

        let mut a = Address::with_protocol(Protocol::Tcp, Some("127.0.0.1"), &port);
        a.set_tcp_nodelay(true);
        let msg = Message::new().with_arg("hi");
        a.send_message(&pool, "/t", &msg).await.unwrap();
        a.set_stream_slip(true);
        a.send_message(&pool, "/t", &msg).await.unwrap();

        let (mut peer, _) = listener.accept().await.unwrap();
        let expected = msg.serialize("/t").unwrap();
        let mut want = BytesMut::new();
        length_prefix(&expected, &mut want);
        slip_encode(&expected, &mut want);

        let mut got = vec![0u8; want.len()];
        tokio::io::AsyncReadExt::read_exact(&mut peer, &mut got).await.unwrap();
        assert_eq!(&got[..], &want[..]);
    }

    #[tokio::test]
    async fn test_tcp_send_retries_after_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let pool = ClientPool::new();
        let mut a = Address::with_protocol(Protocol::Tcp, Some("127.0.0.1"), &port);
        let msg = Message::new().with_arg(1i32);

        a.send_message(&pool, "/r", &msg).await.unwrap();
        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        // the first writes after a close may still succeed; keep sending
        // until the dead connection is noticed and replaced
        let mut reconnected = None;
        for _ in 0..50 {
            a.send_message(&pool, "/r", &msg).await.ok();
            if let Ok(Ok((peer, _))) =
                tokio::time::timeout(std::time::Duration::from_millis(20), listener.accept()).await
            {
                reconnected = Some(peer);
                break;
            }
        }
        assert!(reconnected.is_some());
    }

    #[tokio::test]
    async fn test_try_send_on_fresh_datagram_socket() {
        let server_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut peer = Address::from_datagram_peer(server_socket, client.local_addr().unwrap());

        let msg = Message::new().with_arg(5i32);
        assert_eq!(peer.try_send_message("/now", &msg).unwrap(), msg.length("/now"));

        let mut buf = [0u8; 64];
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &msg.serialize("/now").unwrap()[..]);
    }

    #[tokio::test]
    async fn test_try_send_to_stream_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (accepted, peer_addr) = listener.accept().await.unwrap();
        let mut peer = Address::from_stream_peer(Arc::new(accepted), peer_addr);

        let msg = Message::new().with_arg("echo");
        peer.try_send_message("/back", &msg).unwrap();
        peer.set_stream_slip(true);
        peer.try_send_message("/back", &msg).unwrap();
        assert_eq!(peer.errno(), 0);

        let data = msg.serialize("/back").unwrap();
        let mut want = BytesMut::new();
        length_prefix(&data, &mut want);
        slip_encode(&data, &mut want);
        let mut got = vec![0u8; want.len()];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut got).await.unwrap();
        assert_eq!(&got[..], &want[..]);
    }

    #[test]
    fn test_try_send_without_socket_fails() {
        let mut a = Address::new(Some("127.0.0.1"), "9");
        assert!(a.try_send_message("/x", &Message::new()).is_err());
        assert_ne!(a.errno(), 0);
    }

    #[tokio::test]
    async fn test_unix_send() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("osc.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();
        let pool = ClientPool::new();

        let mut a = Address::with_protocol(Protocol::Unix, None, path.to_str().unwrap());
        let msg = Message::new().with_arg(2.5f32);
        a.send_message(&pool, "/u", &msg).await.unwrap();

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &msg.serialize("/u").unwrap()[..]);
    }
}
