//! Message-framed connection carrying [`skein_proto::Frame`]s.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use skein_core::{Connection, FramedConnection, TransportError};
use skein_proto::{Frame, Opcode, ProtocolError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf},
    net::TcpStream,
    sync::Mutex,
    time::Instant,
};

use super::WriteSide;

/// Read half plus the bytes received but not yet framed.
///
/// Bytes stay buffered across timed-out reads, so a timeout in the middle of
/// a frame loses nothing.
struct FrameReader<S> {
    half: ReadHalf<S>,
    buf: BytesMut,
}

impl<S: AsyncRead + Send + 'static> FrameReader<S> {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            match Frame::decode(&self.buf) {
                Ok(frame) => {
                    self.buf.advance(frame.encoded_len());
                    return Ok(frame);
                },
                Err(ProtocolError::FrameTooShort { .. } | ProtocolError::FrameTruncated { .. }) => {},
                Err(e) => return Err(TransportError::Protocol(e.to_string())),
            }

            if self.half.read_buf(&mut self.buf).await? == 0 {
                return Err(TransportError::Eof);
            }
        }
    }
}

/// Skein frames over any async read/write pair.
///
/// Application bytes travel as `Data` frames. Incoming `Ping` frames are
/// answered with `Pong` and never surface; a `Close` frame ends the stream.
pub struct FramedConn<S> {
    side: WriteSide<S>,
    reader: Mutex<FrameReader<S>>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> FramedConn<S> {
    /// Wrap a connected stream.
    pub fn new(stream: S, local: Option<SocketAddr>, remote: Option<SocketAddr>) -> Self {
        let (half, writer) = tokio::io::split(stream);
        Self {
            side: WriteSide::new(writer, local, remote),
            reader: Mutex::new(FrameReader { half, buf: BytesMut::with_capacity(4096) }),
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<usize, TransportError> {
        let wire = frame.to_vec().map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.side.write_all(&wire).await
    }
}

impl FramedConn<TcpStream> {
    /// Wrap a tokio TCP socket, recording its addresses.
    pub fn tcp(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok();
        let remote = stream.peer_addr().ok();
        Self::new(stream, local, remote)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> Connection for FramedConn<S> {
    fn id(&self) -> u32 {
        self.side.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.side.local
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.side.remote
    }

    /// Send `buf` as one `Data` frame. Returns the payload length.
    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.write_frame(&Frame::data(Bytes::copy_from_slice(buf))).await?;
        Ok(buf.len())
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

    /// Send a `Close` frame, then shut the write half down.
    async fn close(&self, linger: Duration) {
        if !self.side.is_closed() {
            let _ = tokio::time::timeout(linger, self.write_frame(&Frame::control(Opcode::Close))).await;
        }
        self.side.shutdown(linger).await;
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> FramedConnection for FramedConn<S> {
    async fn read_frame(&self) -> Result<Bytes, TransportError> {
        if self.side.is_closed() {
            return Err(TransportError::Closed);
        }

        let bound = self.side.timeouts.read_bound();
        loop {
            let frame = tokio::time::timeout_at(bound, async {
                let mut reader = self.reader.lock().await;
                reader.next_frame().await
            })
            .await??;

            match frame.opcode() {
                Opcode::Data => return Ok(frame.payload),
                Opcode::Ping => {
                    self.write_frame(&Frame::control(Opcode::Pong)).await?;
                },
                Opcode::Pong => {
                    tracing::trace!(conn = self.side.id, "pong received");
                },
                Opcode::Close => return Err(TransportError::Eof),
            }
        }
    }

    async fn write_ping(&self) -> Result<(), TransportError> {
        self.write_frame(&Frame::control(Opcode::Ping)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    async fn read_raw_frame(stream: &mut tokio::io::DuplexStream) -> Frame {
        let mut buf = Vec::new();
        loop {
            if let Ok(frame) = Frame::decode(&buf) {
                return frame;
            }
            let mut chunk = [0u8; 64];
            let n = stream.read(&mut chunk).await.expect("read");
            assert!(n > 0, "stream ended before a whole frame");
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    #[tokio::test]
    async fn write_wraps_bytes_in_data_frame() {
        let (near, mut far) = tokio::io::duplex(256);
        let conn = FramedConn::new(near, None, None);

        conn.write(b"hello").await.expect("write");

        let frame = read_raw_frame(&mut far).await;
        assert_eq!(frame.opcode(), Opcode::Data);
        assert_eq!(frame.payload.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn ping_is_answered_and_not_surfaced() {
        let (near, mut far) = tokio::io::duplex(256);
        let conn = FramedConn::new(near, None, None);

        let mut wire = Frame::control(Opcode::Ping).to_vec().expect("encode");
        wire.extend(Frame::data(&b"payload"[..]).to_vec().expect("encode"));
        far.write_all(&wire).await.expect("write");

        let payload = conn.read_frame().await.expect("data frame");
        assert_eq!(payload.as_ref(), b"payload");

        let reply = read_raw_frame(&mut far).await;
        assert_eq!(reply.opcode(), Opcode::Pong);
    }

    #[tokio::test]
    async fn close_frame_ends_the_stream() {
        let (near, mut far) = tokio::io::duplex(256);
        let conn = FramedConn::new(near, None, None);

        far.write_all(&Frame::control(Opcode::Close).to_vec().expect("encode")).await.expect("write");

        assert_eq!(conn.read_frame().await, Err(TransportError::Eof));
    }

    #[tokio::test]
    async fn garbage_is_a_protocol_error() {
        let (near, mut far) = tokio::io::duplex(256);
        let conn = FramedConn::new(near, None, None);

        far.write_all(b"definitely not a frame").await.expect("write");

        assert!(matches!(conn.read_frame().await, Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn frame_split_across_writes_is_reassembled() {
        let (near, mut far) = tokio::io::duplex(256);
        let conn = FramedConn::new(near, None, None);
        let wire = Frame::data(&b"split me"[..]).to_vec().expect("encode");

        let writer = tokio::spawn(async move {
            for chunk in wire.chunks(3) {
                far.write_all(chunk).await.expect("write");
                tokio::task::yield_now().await;
            }
            far
        });

        let payload = conn.read_frame().await.expect("frame");
        assert_eq!(payload.as_ref(), b"split me");
        drop(writer.await);
    }
}
