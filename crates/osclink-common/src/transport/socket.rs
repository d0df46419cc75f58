//! Shared socket handles
//!
//! A socket may be used by an [`crate::transport::Address`] for sending and
//! by a [`crate::server::Server`] for receiving at the same time. Both hold an
//! `Arc` to it; the descriptor is closed when the last holder drops it.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::{TcpStream, UdpSocket, UnixDatagram};

/// A socket shared between senders and receivers
#[derive(Debug, Clone)]
pub enum SocketHandle {
    Udp(Arc<UdpSocket>),
    Tcp(Arc<TcpStream>),
    Unix(Arc<UnixDatagram>),
}

impl SocketHandle {
    /// Whether both handles share the same socket
    pub fn same_socket(&self, other: &SocketHandle) -> bool {
        match (self, other) {
            (SocketHandle::Udp(a), SocketHandle::Udp(b)) => Arc::ptr_eq(a, b),
            (SocketHandle::Tcp(a), SocketHandle::Tcp(b)) => Arc::ptr_eq(a, b),
            (SocketHandle::Unix(a), SocketHandle::Unix(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            SocketHandle::Udp(s) => s.local_addr().ok(),
            SocketHandle::Tcp(s) => s.local_addr().ok(),
            SocketHandle::Unix(_) => None,
        }
    }
}

/// Writes all of `data` to a stream shared behind an `Arc`.
///
/// `TcpStream` only offers `&mut self` writes through `AsyncWrite`, so the
/// shared handle drives readiness and `try_write` directly.
pub async fn write_all_shared(stream: &TcpStream, mut data: &[u8]) -> io::Result<usize> {
    let total = data.len();
    while !data.is_empty() {
        stream.writable().await?;
        match stream.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Writes a whole frame to a shared stream without waiting.
///
/// Fails with `WouldBlock` when nothing could be written. A frame cut short
/// by a full send buffer would desynchronize the peer's framing, so the
/// connection is shut down in that case.
pub fn try_write_frame(stream: &TcpStream, frame: &[u8]) -> io::Result<()> {
    let socket = SockRef::from(stream);
    let mut written = 0;
    while written < frame.len() {
        match socket.send(&frame[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if written > 0 {
                    let _ = socket.shutdown(Shutdown::Both);
                }
                return Err(e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_write_all_shared() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = Arc::new(TcpStream::connect(addr).await.unwrap());
        let (server, _) = listener.accept().await.unwrap();

        let payload = vec![7u8; 100_000];
        let writer = {
            let client = client.clone();
            let payload = payload.clone();
            tokio::spawn(async move { write_all_shared(&client, &payload).await })
        };

        let mut received = Vec::new();
        let mut buf = vec![0u8; 8192];
        while received.len() < payload.len() {
            server.readable().await.unwrap();
            match server.try_read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert_eq!(writer.await.unwrap().unwrap(), payload.len());
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_try_write_frame_on_fresh_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        try_write_frame(&client, b"\0\0\0\x04abcd").unwrap();

        let mut got = [0u8; 8];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut got).await.unwrap();
        assert_eq!(&got, b"\0\0\0\x04abcd");
    }

    #[tokio::test]
    async fn test_same_socket() {
        let a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let ha = SocketHandle::Udp(a.clone());
        assert!(ha.same_socket(&SocketHandle::Udp(a)));
        assert!(!ha.same_socket(&SocketHandle::Udp(b)));
        assert!(ha.local_addr().is_some());
    }
}
