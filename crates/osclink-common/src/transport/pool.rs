//! Shared outbound sockets
//!
//! Datagram sends to addresses without their own socket go through one
//! socket per address family. The pool is created once by the caller and
//! passed to every send, so unrelated parts of a program can share it or
//! keep separate pools.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::Result;

/// Pool statistics
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Sockets bound by the pool itself
    pub sockets_created: AtomicU64,
    /// Sockets handed to the pool with [`ClientPool::adopt`]
    pub sockets_adopted: AtomicU64,
    /// Datagram sockets handed out for sends
    pub checkouts: AtomicU64,
}

/// Outbound datagram sockets shared across sends
#[derive(Debug, Default)]
pub struct ClientPool {
    udp_v4: Mutex<Option<Arc<UdpSocket>>>,
    udp_v6: Mutex<Option<Arc<UdpSocket>>>,
    stats: PoolStats,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, ipv6: bool) -> &Mutex<Option<Arc<UdpSocket>>> {
        if ipv6 {
            &self.udp_v6
        } else {
            &self.udp_v4
        }
    }

    /// Returns the shared datagram socket for the address family, binding
    /// it on first use.
    pub async fn udp_socket(&self, ipv6: bool) -> Result<Arc<UdpSocket>> {
        self.stats.checkouts.fetch_add(1, Ordering::Relaxed);
        if let Some(socket) = self.slot(ipv6).lock().clone() {
            return Ok(socket);
        }

        let bind_addr = if ipv6 { "[::]:0" } else { "0.0.0.0:0" };
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);

        let mut slot = self.slot(ipv6).lock();
        if let Some(existing) = slot.clone() {
            // another task bound one while we were waiting
            return Ok(existing);
        }
        debug!(local = ?socket.local_addr().ok(), "Bound shared client socket");
        self.stats.sockets_created.fetch_add(1, Ordering::Relaxed);
        *slot = Some(socket.clone());
        Ok(socket)
    }

    /// Uses `socket` for subsequent sends of its address family, typically a
    /// server socket so replies come back to the server port.
    pub fn adopt(&self, socket: Arc<UdpSocket>) -> Result<()> {
        let ipv6 = socket.local_addr()?.is_ipv6();
        *self.slot(ipv6).lock() = Some(socket);
        self.stats.sockets_adopted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drops the pooled sockets
    pub fn clear(&self) {
        *self.udp_v4.lock() = None;
        *self.udp_v6.lock() = None;
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}
