//! Transport capability sets.
//!
//! A session owns exactly one connection. The engine dispatches on the
//! [`Transport`] tag rather than on the concrete connection type, so a
//! connection implementation only has to provide the primitives of its own
//! kind.
//!
//! # Timeouts and deadlines
//!
//! Every blocking read or write is bounded by the per-call timeout and by the
//! absolute deadline, whichever comes first. When the bound elapses the call
//! returns [`TransportError::Timeout`]. The session pushes both deadlines to
//! `now + wait` when it stops, so a task parked in transport I/O wakes up
//! promptly. [`IoTimeouts`] implements this bookkeeping for connection
//! implementations.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::TransportError;

/// Default per-call read and write timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Allocate a process-unique connection id.
pub fn next_connection_id() -> u32 {
    static NEXT_ID: AtomicU32 = AtomicU32::new(1);
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Primitives shared by every transport kind.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Connection id, unique within the process.
    fn id(&self) -> u32;

    /// Local socket address, if bound.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Peer address. `None` for unconnected datagram sockets.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Write `buf` as one physical write.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if the write timeout or deadline elapsed
    /// - `TransportError::Closed` if the socket was already released
    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Per-call read timeout.
    fn set_read_timeout(&self, timeout: Duration);

    /// Per-call write timeout.
    fn set_write_timeout(&self, timeout: Duration);

    /// Current per-call read timeout.
    fn read_timeout(&self) -> Duration;

    /// Current per-call write timeout.
    fn write_timeout(&self) -> Duration;

    /// Absolute bound for every subsequent read.
    fn set_read_deadline(&self, deadline: Instant);

    /// Absolute bound for every subsequent write.
    fn set_write_deadline(&self, deadline: Instant);

    /// Release the socket, letting outstanding output drain for at most
    /// `linger`.
    async fn close(&self, linger: Duration);
}

/// Byte-stream connection: messages may span reads.
#[async_trait]
pub trait StreamConnection: Connection {
    /// Read whatever bytes are available into `buf`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` on timeout (not a failure)
    /// - `TransportError::Eof` once the peer has closed its side
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// Datagram connection: every read yields one datagram and its sender.
#[async_trait]
pub trait DatagramConnection: Connection {
    /// Receive one datagram into `buf`. Excess bytes are discarded.
    async fn read(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError>;

    /// Send one datagram to `peer`.
    async fn send_to(&self, buf: &[u8], peer: SocketAddr) -> Result<usize, TransportError>;
}

/// Message-framed connection: the transport delivers whole frames.
#[async_trait]
pub trait FramedConnection: Connection {
    /// Read the payload of the next data frame.
    async fn read_frame(&self) -> Result<Bytes, TransportError>;

    /// Send a keepalive ping.
    async fn write_ping(&self) -> Result<(), TransportError>;
}

/// Transport kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Byte stream (TCP)
    Stream,
    /// Datagram (UDP)
    Datagram,
    /// Message-framed stream
    Framed,
}

impl TransportKind {
    /// Session name used until one is set explicitly.
    pub fn default_session_name(self) -> &'static str {
        match self {
            Self::Stream => "tcp-session",
            Self::Datagram => "udp-session",
            Self::Framed => "framed-session",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Datagram => f.write_str("datagram"),
            Self::Framed => f.write_str("framed"),
        }
    }
}

/// A connection tagged with its transport kind.
#[derive(Clone)]
pub enum Transport {
    /// Byte stream
    Stream(Arc<dyn StreamConnection>),
    /// Datagram
    Datagram(Arc<dyn DatagramConnection>),
    /// Message-framed
    Framed(Arc<dyn FramedConnection>),
}

impl Transport {
    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stream(_) => TransportKind::Stream,
            Self::Datagram(_) => TransportKind::Datagram,
            Self::Framed(_) => TransportKind::Framed,
        }
    }

    /// Kind-independent primitives.
    pub fn as_connection(&self) -> &dyn Connection {
        match self {
            Self::Stream(conn) => conn.as_ref(),
            Self::Datagram(conn) => conn.as_ref(),
            Self::Framed(conn) => conn.as_ref(),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conn = self.as_connection();
        f.debug_struct("Transport")
            .field("kind", &self.kind())
            .field("id", &conn.id())
            .field("local", &conn.local_addr())
            .field("remote", &conn.remote_addr())
            .finish()
    }
}

/// Timeout and deadline bookkeeping for connection implementations.
#[derive(Debug)]
pub struct IoTimeouts {
    inner: Mutex<TimeoutState>,
}

#[derive(Debug)]
struct TimeoutState {
    read_timeout: Duration,
    write_timeout: Duration,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl IoTimeouts {
    /// Timeouts with no deadlines set.
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(TimeoutState {
                read_timeout,
                write_timeout,
                read_deadline: None,
                write_deadline: None,
            }),
        }
    }

    /// Set the per-call read timeout.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.inner.lock().read_timeout = timeout;
    }

    /// Set the per-call write timeout.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.inner.lock().write_timeout = timeout;
    }

    /// Per-call read timeout.
    pub fn read_timeout(&self) -> Duration {
        self.inner.lock().read_timeout
    }

    /// Per-call write timeout.
    pub fn write_timeout(&self) -> Duration {
        self.inner.lock().write_timeout
    }

    /// Set the absolute read deadline.
    pub fn set_read_deadline(&self, deadline: Instant) {
        self.inner.lock().read_deadline = Some(deadline);
    }

    /// Set the absolute write deadline.
    pub fn set_write_deadline(&self, deadline: Instant) {
        self.inner.lock().write_deadline = Some(deadline);
    }

    /// Instant at which a read started now must give up.
    pub fn read_bound(&self) -> Instant {
        let state = self.inner.lock();
        bound(state.read_timeout, state.read_deadline)
    }

    /// Instant at which a write started now must give up.
    pub fn write_bound(&self) -> Instant {
        let state = self.inner.lock();
        bound(state.write_timeout, state.write_deadline)
    }
}

impl Default for IoTimeouts {
    fn default() -> Self {
        Self::new(DEFAULT_IO_TIMEOUT, DEFAULT_IO_TIMEOUT)
    }
}

fn bound(timeout: Duration, deadline: Option<Instant>) -> Instant {
    let by_timeout = Instant::now() + timeout;
    deadline.map_or(by_timeout, |deadline| by_timeout.min(deadline))
}

/// Byte and package counters for one session.
///
/// Updated with atomic increments and read without locking.
#[derive(Debug, Default)]
pub struct IoStats {
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    read_pkgs: AtomicU64,
    write_pkgs: AtomicU64,
}

/// Point-in-time copy of [`IoStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes read from the transport
    pub read_bytes: u64,
    /// Bytes written to the transport
    pub write_bytes: u64,
    /// Packages delivered to the listener
    pub read_pkgs: u64,
    /// Packages written by the writer
    pub write_pkgs: u64,
}

impl IoStats {
    pub(crate) fn add_read_bytes(&self, n: usize) {
        self.read_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_write_bytes(&self, n: usize) {
        self.write_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn incr_read_pkgs(&self) {
        self.read_pkgs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_write_pkgs(&self) {
        self.write_pkgs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [&self.read_bytes, &self.write_bytes, &self.read_pkgs, &self.write_pkgs] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            read_pkgs: self.read_pkgs.load(Ordering::Relaxed),
            write_pkgs: self.write_pkgs.load(Ordering::Relaxed),
        }
    }
}
