//! Tokio connection implementations.
//!
//! - [`StreamConn`]: raw byte stream over any `AsyncRead + AsyncWrite`
//! - [`FramedConn`]: skein frames over any `AsyncRead + AsyncWrite`; answers
//!   pings internally and treats a `Close` frame as end of stream
//! - [`UdpConn`]: datagrams over a tokio `UdpSocket`
//!
//! The stream-based connections are generic so the same code runs on tokio
//! TCP sockets, in-memory duplex pipes and simulated networks.
//!
//! Every blocking call is bounded by [`IoTimeouts`]: whichever of the
//! per-call timeout and the absolute deadline comes first ends the call with
//! [`TransportError::Timeout`].

mod datagram;
mod framed;
mod stream;

use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

pub use datagram::UdpConn;
pub use framed::FramedConn;
use skein_core::{IoTimeouts, SessionConfig, TransportError, next_connection_id};
use socket2::{SockRef, TcpKeepalive};
pub use stream::StreamConn;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, WriteHalf},
    net::TcpStream,
    sync::Mutex,
};

/// Apply the TCP options from `config` to an accepted or dialed socket.
pub fn tune_tcp(stream: &TcpStream, config: &SessionConfig) -> io::Result<()> {
    stream.set_nodelay(config.tcp_no_delay)?;

    let sock = SockRef::from(stream);
    sock.set_keepalive(true)?;
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(config.keep_alive_period))
}

/// Identity, timeouts and the write half shared by the stream-based
/// connections.
struct WriteSide<S> {
    id: u32,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
    timeouts: IoTimeouts,
    writer: Mutex<WriteHalf<S>>,
    closed: AtomicBool,
}

impl<S: AsyncWrite + Send + 'static> WriteSide<S> {
    fn new(writer: WriteHalf<S>, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        Self {
            id: next_connection_id(),
            local,
            remote,
            timeouts: IoTimeouts::default(),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write and flush `buf` within the write bound.
    async fn write_all(&self, buf: &[u8]) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let bound = self.timeouts.write_bound();
        tokio::time::timeout_at(bound, async {
            let mut writer = self.writer.lock().await;
            writer.write_all(buf).await?;
            writer.flush().await
        })
        .await??;

        Ok(buf.len())
    }

    /// Mark closed and shut the write half down, waiting at most `linger`.
    async fn shutdown(&self, linger: Duration) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let result = tokio::time::timeout(linger, async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        })
        .await;

        match result {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!(conn = self.id, "shutdown failed: {e}"),
            Err(_) => tracing::debug!(conn = self.id, ?linger, "linger elapsed before shutdown"),
        }
    }
}
