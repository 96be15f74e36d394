//! I/O task: transport reads, decode, read-queue feed.

use std::{panic::AssertUnwindSafe, sync::Arc, sync::atomic::Ordering};

use bytes::{Buf, BytesMut};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Session, log_panic};
use crate::{
    codec::{Incoming, Reader, UdpContext},
    connection::{DatagramConnection, FramedConnection, StreamConnection, Transport},
    error::{CodecError, SessionError, TransportError},
    listener::EventListener,
};

/// Size of one physical read for stream sessions, and the datagram buffer
/// headroom over the max message length.
const READ_BUF_LEN: usize = 4096;

/// Largest datagram buffer a session allocates.
const MAX_DATAGRAM_BUF_LEN: usize = 64 * 1024;

/// Everything the I/O task needs, captured once at startup.
struct ReadContext<P: Send + 'static> {
    closer: CancellationToken,
    reader: Option<Arc<dyn Reader<P>>>,
    rq: mpsc::Sender<Incoming<P>>,
    max_msg_len: usize,
    datagram_error_limit: Option<u32>,
}

impl<P: Send + 'static> ReadContext<P> {
    fn check_len(&self, len: usize) -> Result<(), SessionError> {
        if self.max_msg_len > 0 && len > self.max_msg_len {
            return Err(SessionError::MsgTooLong { len, max: self.max_msg_len });
        }
        Ok(())
    }
}

impl<P: Send + 'static> Session<P> {
    pub(super) async fn io_task(self, listener: Arc<dyn EventListener<P>>) {
        let token = self.token();

        let result = match AssertUnwindSafe(self.read_loop(listener.as_ref(), &token))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                log_panic(&token, "io", panic.as_ref());
                Ok(())
            },
        };

        self.stop();

        match result {
            Ok(()) | Err(SessionError::Closed) => debug!(session = %token, "reader exited"),
            Err(err) => {
                warn!(session = %token, error = %err, "reader failed");
                if let Err(panic) = AssertUnwindSafe(listener.on_error(&self, &err)).catch_unwind().await
                {
                    log_panic(&token, "io", panic.as_ref());
                }
            },
        }

        self.inner.active_tasks.fetch_sub(1, Ordering::SeqCst);
        self.inner.task_exit.notify_one();
    }

    async fn read_loop(&self, listener: &dyn EventListener<P>, token: &str) -> Result<(), SessionError> {
        let ctx = {
            let state = self.inner.state.lock();
            let rq = state.rq.as_ref().map(|queue| queue.tx.clone()).ok_or(SessionError::Closed)?;
            ReadContext {
                closer: state.closer.clone(),
                reader: state.reader.clone(),
                rq,
                max_msg_len: state.max_msg_len,
                datagram_error_limit: state.datagram_error_limit,
            }
        };

        let transport = self.transport();
        match &transport {
            Transport::Stream(conn) => self.read_stream(conn.as_ref(), &ctx, token).await,
            Transport::Datagram(conn) => self.read_datagrams(conn.as_ref(), &ctx, listener, token).await,
            Transport::Framed(conn) => self.read_frames(conn.as_ref(), &ctx, token).await,
        }
    }

    /// Accumulate bytes across reads and drain every whole package.
    async fn read_stream(
        &self,
        conn: &dyn StreamConnection,
        ctx: &ReadContext<P>,
        token: &str,
    ) -> Result<(), SessionError> {
        let Some(reader) = ctx.reader.as_deref() else {
            return Ok(());
        };
        let mut buf = vec![0u8; READ_BUF_LEN];
        let mut pending = BytesMut::with_capacity(READ_BUF_LEN);

        loop {
            let n = tokio::select! {
                biased;
                () = ctx.closer.cancelled() => return Ok(()),
                read = conn.read(&mut buf) => match read {
                    Ok(0) | Err(TransportError::Eof) => {
                        debug!(session = %token, "peer closed stream");
                        return Ok(());
                    },
                    Ok(n) => n,
                    Err(err) if err.is_timeout() => continue,
                    Err(err) => return Err(err.into()),
                },
            };

            self.inner.stats.add_read_bytes(n);
            pending.extend_from_slice(&buf[..n]);

            while !pending.is_empty() {
                let (pkg, len) = reader.read(self, &pending)?;
                ctx.check_len(len)?;
                let Some(pkg) = pkg else {
                    break;
                };
                if len == 0 || len > pending.len() {
                    return Err(CodecError::Malformed(format!(
                        "reader consumed {len} of {} buffered bytes",
                        pending.len()
                    ))
                    .into());
                }

                pending.advance(len);
                self.deliver(ctx, Incoming::Package(pkg)).await?;
            }
        }
    }

    /// One package per datagram, decode failures skipped.
    async fn read_datagrams(
        &self,
        conn: &dyn DatagramConnection,
        ctx: &ReadContext<P>,
        listener: &dyn EventListener<P>,
        token: &str,
    ) -> Result<(), SessionError> {
        let Some(reader) = ctx.reader.as_deref() else {
            return Ok(());
        };
        let mut buf = vec![0u8; datagram_buf_len(ctx.max_msg_len)];
        let mut failures = 0u32;

        loop {
            let (n, peer) = tokio::select! {
                biased;
                () = ctx.closer.cancelled() => return Ok(()),
                read = conn.read(&mut buf) => match read {
                    Ok(received) => received,
                    Err(err) if err.is_timeout() => continue,
                    Err(err) => return Err(err.into()),
                },
            };
            if n == 0 {
                continue;
            }
            self.inner.stats.add_read_bytes(n);

            let decoded = reader
                .read(self, &buf[..n])
                .map_err(SessionError::from)
                .and_then(|(pkg, len)| ctx.check_len(len.max(n)).map(|()| pkg));

            match decoded {
                Ok(Some(pkg)) => {
                    failures = 0;
                    self.deliver(ctx, Incoming::Datagram(UdpContext { package: pkg, peer })).await?;
                },
                Ok(None) => {
                    debug!(session = %token, %peer, len = n, "datagram held no whole package");
                },
                Err(err) => {
                    warn!(session = %token, %peer, error = %err, "dropping undecodable datagram");
                    failures += 1;
                    if ctx.datagram_error_limit.is_some_and(|limit| failures >= limit) {
                        return Err(err);
                    }
                    if err.is_too_long() {
                        listener.on_error(self, &err).await;
                    }
                },
            }
        }
    }

    /// Whole frames from the transport, decoded when a reader is set.
    async fn read_frames(
        &self,
        conn: &dyn FramedConnection,
        ctx: &ReadContext<P>,
        token: &str,
    ) -> Result<(), SessionError> {
        loop {
            let frame = tokio::select! {
                biased;
                () = ctx.closer.cancelled() => return Ok(()),
                read = conn.read_frame() => match read {
                    Ok(frame) => frame,
                    Err(TransportError::Eof) => {
                        debug!(session = %token, "peer closed framed connection");
                        return Ok(());
                    },
                    Err(err) if err.is_timeout() => continue,
                    Err(err) => return Err(err.into()),
                },
            };
            self.inner.stats.add_read_bytes(frame.len());

            let Some(reader) = ctx.reader.as_deref() else {
                self.deliver(ctx, Incoming::Frame(frame)).await?;
                continue;
            };

            match reader.read(self, &frame) {
                Ok((pkg, len)) => {
                    ctx.check_len(len)?;
                    match pkg {
                        Some(pkg) => self.deliver(ctx, Incoming::Package(pkg)).await?,
                        None => warn!(session = %token, len = frame.len(), "frame held no whole package"),
                    }
                },
                Err(err) => {
                    warn!(session = %token, error = %err, "dropping undecodable frame");
                },
            }
        }
    }

    /// Enqueue one produced item unless the session is closing.
    async fn deliver(&self, ctx: &ReadContext<P>, item: Incoming<P>) -> Result<(), SessionError> {
        if ctx.closer.is_cancelled() {
            return Err(SessionError::Closed);
        }
        self.update_active();

        tokio::select! {
            biased;
            () = ctx.closer.cancelled() => Err(SessionError::Closed),
            sent = ctx.rq.send(item) => sent.map_err(|_| SessionError::Closed),
        }
    }
}

/// Receive buffer for one datagram: headroom over `max_msg_len` so an
/// oversized datagram is seen whole and reported, capped at 64 KiB.
fn datagram_buf_len(max_msg_len: usize) -> usize {
    match max_msg_len {
        0 => MAX_DATAGRAM_BUF_LEN,
        max => max
            .saturating_add(READ_BUF_LEN)
            .min(max.saturating_mul(2))
            .min(MAX_DATAGRAM_BUF_LEN),
    }
}
