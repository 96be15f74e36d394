//! Scripted in-memory connections.
//!
//! Tests push inbound bytes, datagrams or frames and inspect what the session
//! wrote. Reads honor [`IoTimeouts`], so close deadlines and read timeouts
//! behave as they do on real sockets.

use std::{
    collections::VecDeque,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use skein_core::{
    Connection, DatagramConnection, FramedConnection, IoTimeouts, StreamConnection,
    TransportError, next_connection_id,
};
use tokio::{sync::Notify, time::Instant};

/// Local address reported by scripted connections.
pub const LOCAL_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 7000);

/// Remote address reported by scripted connections.
pub const REMOTE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 7001);

struct InboxState<T> {
    queue: VecDeque<T>,
    hung_up: bool,
    failure: Option<TransportError>,
}

/// Inbound queue a read waits on.
struct Inbox<T> {
    state: Mutex<InboxState<T>>,
    notify: Notify,
}

impl<T: Send> Inbox<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(InboxState { queue: VecDeque::new(), hung_up: false, failure: None }),
            notify: Notify::new(),
        }
    }

    fn push(&self, items: impl IntoIterator<Item = T>) {
        self.state.lock().queue.extend(items);
        self.notify.notify_waiters();
    }

    fn hang_up(&self) {
        self.state.lock().hung_up = true;
        self.notify.notify_waiters();
    }

    fn fail(&self, err: TransportError) {
        self.state.lock().failure = Some(err);
        self.notify.notify_waiters();
    }

    /// Wait until `take` yields something, the inbox fails or hangs up, or
    /// `bound` passes. Queued items are served before a hang-up.
    async fn take<R>(
        &self,
        bound: Instant,
        mut take: impl FnMut(&mut VecDeque<T>) -> Option<R> + Send,
    ) -> Result<R, TransportError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(taken) = take(&mut state.queue) {
                    return Ok(taken);
                }
                if let Some(err) = state.failure.take() {
                    return Err(err);
                }
                if state.hung_up {
                    return Err(TransportError::Eof);
                }
            }

            if tokio::time::timeout_at(bound, notified).await.is_err() {
                return Err(TransportError::Timeout);
            }
        }
    }
}

/// Identity, timeouts and the closed flag every scripted connection has.
struct Endpoint {
    id: u32,
    timeouts: IoTimeouts,
    closed: AtomicBool,
    write_delay: Mutex<Duration>,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            id: next_connection_id(),
            timeouts: IoTimeouts::default(),
            closed: AtomicBool::new(false),
            write_delay: Mutex::new(Duration::ZERO),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fail if closed, otherwise stall for the configured write delay.
    async fn before_write(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Forwards the timeout plumbing and identity of [`Connection`] to `self.base`.
macro_rules! endpoint_accessors {
    () => {
        fn id(&self) -> u32 {
            self.base.id
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            Some(LOCAL_ADDR)
        }

        fn set_read_timeout(&self, timeout: Duration) {
            self.base.timeouts.set_read_timeout(timeout);
        }

        fn set_write_timeout(&self, timeout: Duration) {
            self.base.timeouts.set_write_timeout(timeout);
        }

        fn read_timeout(&self) -> Duration {
            self.base.timeouts.read_timeout()
        }

        fn write_timeout(&self) -> Duration {
            self.base.timeouts.write_timeout()
        }

        fn set_read_deadline(&self, deadline: Instant) {
            self.base.timeouts.set_read_deadline(deadline);
        }

        fn set_write_deadline(&self, deadline: Instant) {
            self.base.timeouts.set_write_deadline(deadline);
        }
    };
}

/// Byte stream whose reads coalesce everything pushed since the last read.
///
/// Built alone, writes are only recorded. Built with [`ScriptedStream::pair`],
/// each side's writes also land in the other side's inbox and closing one
/// side hangs up the other.
pub struct ScriptedStream {
    base: Endpoint,
    inbox: Arc<Inbox<u8>>,
    peer: Option<Arc<Inbox<u8>>>,
    written: Mutex<Vec<u8>>,
    reads: AtomicUsize,
}

impl ScriptedStream {
    /// Stand-alone stream.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(Arc::new(Inbox::new()), None))
    }

    /// Two streams wired back to back: `(client, server)`.
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let client_inbox = Arc::new(Inbox::new());
        let server_inbox = Arc::new(Inbox::new());
        let client = Self::build(Arc::clone(&client_inbox), Some(Arc::clone(&server_inbox)));
        let server = Self::build(server_inbox, Some(client_inbox));
        (Arc::new(client), Arc::new(server))
    }

    fn build(inbox: Arc<Inbox<u8>>, peer: Option<Arc<Inbox<u8>>>) -> Self {
        Self { base: Endpoint::new(), inbox, peer, written: Mutex::new(Vec::new()), reads: AtomicUsize::new(0) }
    }

    /// Make `bytes` available to the next read.
    pub fn push(&self, bytes: &[u8]) {
        self.inbox.push(bytes.iter().copied());
    }

    /// End of stream once the pushed bytes are consumed.
    pub fn hang_up(&self) {
        self.inbox.hang_up();
    }

    /// The next read fails with `err`.
    pub fn fail(&self, err: TransportError) {
        self.inbox.fail(err);
    }

    /// Every byte written so far.
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    /// Number of reads that returned data.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Stall every write for `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.base.write_delay.lock() = delay;
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.base.is_closed()
    }
}

#[async_trait]
impl Connection for ScriptedStream {
    endpoint_accessors!();

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(REMOTE_ADDR)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.base.before_write().await?;
        self.written.lock().extend_from_slice(buf);
        if let Some(peer) = &self.peer {
            peer.push(buf.iter().copied());
        }
        Ok(buf.len())
    }

    async fn close(&self, _linger: Duration) {
        if !self.base.closed.swap(true, Ordering::SeqCst)
            && let Some(peer) = &self.peer
        {
            peer.hang_up();
        }
    }
}

#[async_trait]
impl StreamConnection for ScriptedStream {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.base.is_closed() {
            return Err(TransportError::Closed);
        }

        let bound = self.base.timeouts.read_bound();
        let n = self
            .inbox
            .take(bound, |queue| {
                if queue.is_empty() {
                    return None;
                }
                let n = queue.len().min(buf.len());
                for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
                    *slot = byte;
                }
                Some(n)
            })
            .await?;

        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(n)
    }
}

/// Unconnected datagram socket fed by the test.
pub struct ScriptedDatagram {
    base: Endpoint,
    default_peer: Option<SocketAddr>,
    inbox: Inbox<(Bytes, SocketAddr)>,
    sent: Mutex<Vec<(Bytes, SocketAddr)>>,
}

impl ScriptedDatagram {
    /// Datagram socket; `default_peer` is where plain writes go.
    pub fn new(default_peer: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self { base: Endpoint::new(), default_peer, inbox: Inbox::new(), sent: Mutex::new(Vec::new()) })
    }

    /// Deliver one datagram from `from`.
    pub fn push(&self, from: SocketAddr, bytes: &[u8]) {
        self.inbox.push([(Bytes::copy_from_slice(bytes), from)]);
    }

    /// The next read fails with `err`.
    pub fn fail(&self, err: TransportError) {
        self.inbox.fail(err);
    }

    /// Every datagram sent so far, with its destination.
    pub fn sent(&self) -> Vec<(Bytes, SocketAddr)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Connection for ScriptedDatagram {
    endpoint_accessors!();

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.default_peer
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let peer = self
            .default_peer
            .ok_or_else(|| TransportError::Protocol("no default peer".to_string()))?;
        self.send_to(buf, peer).await
    }

    async fn close(&self, _linger: Duration) {
        self.base.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatagramConnection for ScriptedDatagram {
    async fn read(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        if self.base.is_closed() {
            return Err(TransportError::Closed);
        }

        let bound = self.base.timeouts.read_bound();
        self.inbox
            .take(bound, |queue| {
                let (datagram, from) = queue.pop_front()?;
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Some((n, from))
            })
            .await
    }

    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Result<usize, TransportError> {
        self.base.before_write().await?;
        self.sent.lock().push((Bytes::copy_from_slice(buf), peer));
        Ok(buf.len())
    }
}

/// Message-framed connection fed whole frames by the test.
pub struct ScriptedFramed {
    base: Endpoint,
    inbox: Inbox<Bytes>,
    written: Mutex<Vec<Bytes>>,
    pings: AtomicUsize,
}

impl ScriptedFramed {
    /// Framed connection with nothing queued.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Endpoint::new(),
            inbox: Inbox::new(),
            written: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
        })
    }

    /// Deliver one frame payload.
    pub fn push(&self, frame: &[u8]) {
        self.inbox.push([Bytes::copy_from_slice(frame)]);
    }

    /// End of stream once the pushed frames are consumed.
    pub fn hang_up(&self) {
        self.inbox.hang_up();
    }

    /// Every frame payload written so far.
    pub fn written(&self) -> Vec<Bytes> {
        self.written.lock().clone()
    }

    /// Keepalive pings sent so far.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for ScriptedFramed {
    endpoint_accessors!();

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(REMOTE_ADDR)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.base.before_write().await?;
        self.written.lock().push(Bytes::copy_from_slice(buf));
        Ok(buf.len())
    }

    async fn close(&self, _linger: Duration) {
        self.base.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FramedConnection for ScriptedFramed {
    async fn read_frame(&self) -> Result<Bytes, TransportError> {
        if self.base.is_closed() {
            return Err(TransportError::Closed);
        }

        let bound = self.base.timeouts.read_bound();
        self.inbox.take(bound, VecDeque::pop_front).await
    }

    async fn write_ping(&self) -> Result<(), TransportError> {
        if self.base.is_closed() {
            return Err(TransportError::Closed);
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stream_reads_coalesce_pushes() {
        let stream = ScriptedStream::new();
        stream.push(b"A");
        stream.push(b"B");

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.expect("read failed");

        assert_eq!(&buf[..n], b"AB");
        assert_eq!(stream.reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_read_times_out_then_sees_hang_up() {
        let stream = ScriptedStream::new();
        stream.set_read_timeout(Duration::from_millis(200));

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await, Err(TransportError::Timeout));

        stream.push(b"xy");
        stream.hang_up();
        assert_eq!(stream.read(&mut buf).await, Ok(2));
        assert_eq!(stream.read(&mut buf).await, Err(TransportError::Eof));
    }

    #[tokio::test(start_paused = true)]
    async fn paired_streams_cross_and_hang_up_on_close() {
        let (client, server) = ScriptedStream::pair();
        client.write(b"hi").await.expect("write failed");

        let mut buf = [0u8; 4];
        assert_eq!(server.read(&mut buf).await, Ok(2));
        assert_eq!(&buf[..2], b"hi");

        client.close(Duration::ZERO).await;
        assert_eq!(server.read(&mut buf).await, Err(TransportError::Eof));
        assert_eq!(client.write(b"late").await, Err(TransportError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn datagram_read_truncates_and_reports_sender() {
        let socket = ScriptedDatagram::new(None);
        socket.push(REMOTE_ADDR, b"abcdef");

        let mut buf = [0u8; 4];
        let (n, from) = DatagramConnection::read(socket.as_ref(), &mut buf).await.expect("read failed");

        assert_eq!(n, 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(from, REMOTE_ADDR);
        assert!(matches!(socket.write(b"x").await, Err(TransportError::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn framed_counts_pings() {
        let framed = ScriptedFramed::new();
        framed.write_ping().await.expect("ping failed");
        framed.write_ping().await.expect("ping failed");
        assert_eq!(framed.pings(), 2);

        framed.close(Duration::ZERO).await;
        assert_eq!(framed.write_ping().await, Err(TransportError::Closed));
    }
}
