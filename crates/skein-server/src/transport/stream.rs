//! Raw byte-stream connection.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use skein_core::{Connection, StreamConnection, TransportError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf},
    net::TcpStream,
    sync::Mutex,
    time::Instant,
};

use super::WriteSide;

/// Byte stream over any async read/write pair.
pub struct StreamConn<S> {
    side: WriteSide<S>,
    reader: Mutex<ReadHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> StreamConn<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self { side: WriteSide::new(writer, local, remote), reader: Mutex::new(reader) }
    }
}

impl StreamConn<TcpStream> {
    /// Wrap a tokio TCP socket, recording its addresses.
    pub fn tcp(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        Self::new(stream, local, remote)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> Connection for StreamConn<S> {
    fn id(&self) -> u32 {
        self.side.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.side.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.side.remote
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.side.write_all(buf).await
    }

    fn set_read_timeout(&self, timeout: Duration) {
        self.side.timeouts.set_read_timeout(timeout);
    }

    fn set_write_timeout(&self, timeout: Duration) {
        self.side.timeouts.set_write_timeout(timeout);
    }

    fn read_timeout(&self) -> Duration {
        self.side.timeouts.read_timeout()
    }

    fn write_timeout(&self) -> Duration {
        self.side.timeouts.write_timeout()
    }

    fn set_read_deadline(&self, deadline: Instant) {
        self.side.timeouts.set_read_deadline(deadline);
    }

    fn set_write_deadline(&self, deadline: Instant) {
        self.side.timeouts.set_write_deadline(deadline);
    }

    async fn close(&self, linger: Duration) {
        self.side.shutdown(linger).await;
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> StreamConnection for StreamConn<S> {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.side.is_closed() {
            return Err(TransportError::Closed);
        }

        let bound = self.side.timeouts.read_bound();
        let n = tokio::time::timeout_at(bound, async {
            let mut reader = self.reader.lock().await;
            reader.read(buf).await
        })
        .await??;

        if n == 0 {
            return Err(TransportError::Eof);
        }
        Ok(n)
    }
}
