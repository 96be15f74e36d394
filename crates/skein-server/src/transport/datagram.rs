//! Datagram connection over a tokio UDP socket.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use skein_core::{Connection, DatagramConnection, IoTimeouts, TransportError, next_connection_id};
use tokio::{net::UdpSocket, time::Instant};

/// Datagrams over one UDP socket.
///
/// With a default peer, [`Connection::write`] sends to it; otherwise every
/// send must name its peer through [`DatagramConnection::send_to`].
pub struct UdpConn {
    id: u32,
    socket: Arc<UdpSocket>,
    peer: Option<SocketAddr>,
    timeouts: IoTimeouts,
    closed: AtomicBool,
}

impl UdpConn {
    /// Wrap a bound socket.
    pub fn new(socket: Arc<UdpSocket>, peer: Option<SocketAddr>) -> Self {
        Self {
            id: next_connection_id(),
            socket,
            peer,
            timeouts: IoTimeouts::default(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for UdpConn {
    fn id(&self) -> u32 {
        self.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let Some(peer) = self.peer else {
            return Err(TransportError::Protocol("datagram socket has no default peer".into()));
        };
        self.send_to(buf, peer).await
    }

    fn set_read_timeout(&self, timeout: Duration) {
        self.timeouts.set_read_timeout(timeout);
    }

    fn set_write_timeout(&self, timeout: Duration) {
        self.timeouts.set_write_timeout(timeout);
    }

    fn read_timeout(&self) -> Duration {
        self.timeouts.read_timeout()
    }

    fn write_timeout(&self) -> Duration {
        self.timeouts.write_timeout()
    }

    fn set_read_deadline(&self, deadline: Instant) {
        self.timeouts.set_read_deadline(deadline);
    }

    fn set_write_deadline(&self, deadline: Instant) {
        self.timeouts.set_write_deadline(deadline);
    }

    /// Datagrams have nothing to drain; the socket is released when the last
    /// handle drops.
    async fn close(&self, _linger: Duration) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl DatagramConnection for UdpConn {
    async fn read(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        self.ensure_open()?;
        let bound = self.timeouts.read_bound();
        Ok(tokio::time::timeout_at(bound, self.socket.recv_from(buf)).await??)
    }

    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let bound = self.timeouts.write_bound();
        Ok(tokio::time::timeout_at(bound, self.socket.send_to(buf, peer)).await??)
    }
}
