//! Per-connection session.
//!
//! A [`Session`] binds one connection to an application codec and listener
//! and runs two tasks for it:
//!
//! - the **dispatch task** multiplexes the close signal, the read queue, the
//!   write queue and the cron timer, invoking listener callbacks and the
//!   writer;
//! - the **I/O task** performs transport reads, decodes packages and feeds
//!   the read queue.
//!
//! # Shutdown
//!
//! [`Session::close`] fires a one-shot close signal and returns. Transport
//! deadlines are pulled in so a blocked read wakes up, the I/O task exits,
//! and the dispatch task keeps draining both queues until they are empty and
//! the I/O task is gone, or until the wait timeout elapses. Only then does it
//! call `on_close` and tear the session down: attributes are cleared, both
//! queues are closed and the socket is released with linger.
//!
//! A torn-down session is inert until [`Session::reset`] is called.

mod dispatch;
mod reader;

use std::{
    any::Any,
    backtrace::Backtrace,
    fmt,
    hash::Hash,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::{
    sync::{Notify, mpsc},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    attributes::AttributeStore,
    codec::{Incoming, Outgoing, Reader, Writer},
    connection::{DEFAULT_IO_TIMEOUT, IoStats, StatsSnapshot, Transport, TransportKind},
    error::{SessionError, TransportError},
    listener::EventListener,
    timer::{TickWheel, TimerWheel},
};

/// Default maximum package length.
pub const DEFAULT_MAX_MSG_LEN: usize = 4096;

/// Default cron period.
pub const DEFAULT_CRON_PERIOD: Duration = Duration::from_secs(60);

/// Default close grace period and socket linger.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(3);

/// Floor for a zero `write_pkg` timeout.
const DEFAULT_WRITE_PKG_TIMEOUT: Duration = Duration::from_secs(1);

/// Tasks started by [`Session::run`].
const SESSION_TASKS: usize = 2;

/// Which side of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// Dialed out
    Client,
    /// Accepted
    Server,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// Lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed or reset, not yet running
    Created,
    /// Both tasks running
    Running,
    /// Close signal fired, draining
    Closing,
    /// Torn down
    Closed,
}

/// One connection's lifecycle, queues and dispatch state.
///
/// Cheap to clone; every clone refers to the same session.
pub struct Session<P: Send + 'static> {
    inner: Arc<Inner<P>>,
}

impl<P: Send + 'static> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<P: Send + 'static> {
    role: EndpointRole,
    transport: RwLock<Transport>,
    wheel: Arc<dyn TimerWheel>,
    state: Mutex<State<P>>,
    active_tasks: AtomicUsize,
    task_exit: Notify,
    stats: IoStats,
    last_active: Mutex<Instant>,
}

struct Queue<T> {
    tx: mpsc::Sender<T>,
    rx: Option<mpsc::Receiver<T>>,
}

impl<T> Queue<T> {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Some(rx) }
    }
}

struct State<P: Send + 'static> {
    name: String,
    max_msg_len: usize,
    reader: Option<Arc<dyn Reader<P>>>,
    writer: Option<Arc<dyn Writer<P>>>,
    listener: Option<Arc<dyn EventListener<P>>>,
    closer: CancellationToken,
    period: Duration,
    wait: Duration,
    rq: Option<Queue<Incoming<P>>>,
    wq: Option<Queue<Outgoing<P>>>,
    attrs: Option<AttributeStore>,
    datagram_error_limit: Option<u32>,
    running: bool,
    torn_down: bool,
}

impl<P: Send + 'static> State<P> {
    fn new(kind: TransportKind) -> Self {
        Self {
            name: kind.default_session_name().to_owned(),
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            reader: None,
            writer: None,
            listener: None,
            closer: CancellationToken::new(),
            period: DEFAULT_CRON_PERIOD,
            wait: DEFAULT_WAIT_TIME,
            rq: None,
            wq: None,
            attrs: Some(AttributeStore::new()),
            datagram_error_limit: None,
            running: false,
            torn_down: false,
        }
    }
}

impl<P: Send + 'static> Session<P> {
    /// Session on the process-wide timer wheel.
    pub fn new(role: EndpointRole, transport: Transport) -> Self {
        Self::with_wheel(role, transport, TickWheel::shared())
    }

    /// Session on an explicit timer wheel.
    pub fn with_wheel(role: EndpointRole, transport: Transport, wheel: Arc<dyn TimerWheel>) -> Self {
        let now = wheel.now();
        let conn = transport.as_connection();
        conn.set_read_timeout(DEFAULT_IO_TIMEOUT);
        conn.set_write_timeout(DEFAULT_IO_TIMEOUT);

        let state = State::new(transport.kind());
        Self {
            inner: Arc::new(Inner {
                role,
                transport: RwLock::new(transport),
                wheel,
                state: Mutex::new(state),
                active_tasks: AtomicUsize::new(0),
                task_exit: Notify::new(),
                stats: IoStats::default(),
                last_active: Mutex::new(now),
            }),
        }
    }

    /// Rebind the session to a fresh connection so it can be reused.
    ///
    /// Teardown releases the previous connection, so reuse always needs a new
    /// one. Name, cron period, wait time, I/O timeouts, counters and
    /// attributes return to their defaults and a fresh close signal is
    /// installed. Codec, listener and max message length are kept. Queues
    /// must be sized again before the next [`Session::run`].
    ///
    /// # Panics
    ///
    /// Panics if the session is running.
    pub fn reset(&self, transport: Transport) {
        {
            let state = self.inner.state.lock();
            assert!(!state.running || state.torn_down, "session reset while running");
        }

        let conn = transport.as_connection();
        conn.set_read_timeout(DEFAULT_IO_TIMEOUT);
        conn.set_write_timeout(DEFAULT_IO_TIMEOUT);
        let kind = transport.kind();
        *self.inner.transport.write() = transport;

        {
            let mut state = self.inner.state.lock();
            state.name = kind.default_session_name().to_owned();
            state.closer = CancellationToken::new();
            state.period = DEFAULT_CRON_PERIOD;
            state.wait = DEFAULT_WAIT_TIME;
            state.rq = None;
            state.wq = None;
            state.attrs = Some(AttributeStore::new());
            state.running = false;
            state.torn_down = false;
        }
        self.inner.active_tasks.store(0, Ordering::SeqCst);
        self.inner.stats.reset();
        self.update_active();
    }

    /// Endpoint role.
    pub fn role(&self) -> EndpointRole {
        self.inner.role
    }

    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        self.inner.transport.read().kind()
    }

    /// Underlying connection.
    pub fn transport(&self) -> Transport {
        self.inner.transport.read().clone()
    }

    /// Connection id.
    pub fn id(&self) -> u32 {
        self.transport().as_connection().id()
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport().as_connection().local_addr()
    }

    /// Peer address of the connection.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.transport().as_connection().remote_addr()
    }

    /// Session name.
    pub fn name(&self) -> String {
        self.inner.state.lock().name.clone()
    }

    /// Set the session name.
    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.state.lock().name = name.into();
    }

    /// Identity string used in logs: `{name:id:local<->remote}`.
    pub fn token(&self) -> String {
        let name = self.name();
        let transport = self.transport();
        let conn = transport.as_connection();
        format!(
            "{{{}:{}:{}<->{}}}",
            name,
            conn.id(),
            fmt_addr(conn.local_addr()),
            fmt_addr(conn.remote_addr())
        )
    }

    /// Largest accepted package length.
    pub fn max_msg_len(&self) -> usize {
        self.inner.state.lock().max_msg_len
    }

    /// Set the largest accepted package length. Zero disables the check.
    pub fn set_max_msg_len(&self, len: usize) {
        self.inner.state.lock().max_msg_len = len;
    }

    /// Install the event listener.
    pub fn set_event_listener(&self, listener: Arc<dyn EventListener<P>>) {
        self.inner.state.lock().listener = Some(listener);
    }

    /// Install one handler as both reader and writer.
    pub fn set_pkg_handler<H>(&self, handler: Arc<H>)
    where
        H: Reader<P> + Writer<P>,
    {
        let mut state = self.inner.state.lock();
        state.reader = Some(Arc::clone(&handler) as Arc<dyn Reader<P>>);
        state.writer = Some(handler as Arc<dyn Writer<P>>);
    }

    /// Install the decoder.
    pub fn set_reader(&self, reader: Arc<dyn Reader<P>>) {
        self.inner.state.lock().reader = Some(reader);
    }

    /// Install the encoder.
    pub fn set_writer(&self, writer: Arc<dyn Writer<P>>) {
        self.inner.state.lock().writer = Some(writer);
    }

    /// Heartbeat period.
    pub fn cron_period(&self) -> Duration {
        self.inner.state.lock().period
    }

    /// Set the heartbeat period.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn set_cron_period(&self, period: Duration) {
        assert!(!period.is_zero(), "cron period must be positive");
        self.inner.state.lock().period = period;
    }

    /// Close grace period and socket linger.
    pub fn wait_time(&self) -> Duration {
        self.inner.state.lock().wait
    }

    /// Set the close grace period and socket linger.
    ///
    /// # Panics
    ///
    /// Panics if `wait` is zero.
    pub fn set_wait_time(&self, wait: Duration) {
        assert!(!wait.is_zero(), "wait time must be positive");
        self.inner.state.lock().wait = wait;
    }

    /// Create the read queue.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the session is already running.
    pub fn set_rq_len(&self, len: usize) {
        assert!(len >= 1, "read queue length must be at least 1");
        let mut state = self.inner.state.lock();
        assert!(!state.running, "read queue must be sized before run");
        state.rq = Some(Queue::new(len));
    }

    /// Create the write queue.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the session is already running.
    pub fn set_wq_len(&self, len: usize) {
        assert!(len >= 1, "write queue length must be at least 1");
        let mut state = self.inner.state.lock();
        assert!(!state.running, "write queue must be sized before run");
        state.wq = Some(Queue::new(len));
    }

    /// Per-call transport read timeout.
    pub fn set_read_timeout(&self, timeout: Duration) {
        self.transport().as_connection().set_read_timeout(timeout);
    }

    /// Per-call transport write timeout.
    pub fn set_write_timeout(&self, timeout: Duration) {
        self.transport().as_connection().set_write_timeout(timeout);
    }

    /// Consecutive datagram decode failures tolerated before the I/O task
    /// gives up. `None` keeps going forever.
    pub fn set_datagram_error_limit(&self, limit: Option<u32>) {
        self.inner.state.lock().datagram_error_limit = limit;
    }

    /// Attribute stored under `key`. Always `None` once torn down.
    pub fn get_attribute<K, V>(&self, key: &K) -> Option<Arc<V>>
    where
        K: Hash + Eq + Any + Send + Sync,
        V: Any + Send + Sync,
    {
        self.inner.state.lock().attrs.as_ref()?.get(key)
    }

    /// Store an attribute. No-op once torn down.
    pub fn set_attribute<K, V>(&self, key: K, value: V)
    where
        K: Hash + Eq + Any + Send + Sync,
        V: Any + Send + Sync,
    {
        if let Some(attrs) = self.inner.state.lock().attrs.as_mut() {
            attrs.set(key, value);
        }
    }

    /// Remove an attribute. No-op once torn down.
    pub fn remove_attribute<K>(&self, key: &K)
    where
        K: Hash + Eq + Any + Send + Sync,
    {
        if let Some(attrs) = self.inner.state.lock().attrs.as_mut() {
            attrs.remove(key);
        }
    }

    /// Queue a package for the writer.
    ///
    /// Waits for queue space for at most `timeout`; a zero timeout waits one
    /// second.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` if the session is closing or closed
    /// - `SessionError::Blocked` if the queue stayed full for the whole
    ///   timeout
    pub async fn write_pkg(
        &self,
        pkg: impl Into<Outgoing<P>>,
        timeout: Duration,
    ) -> Result<(), SessionError> {
        let (tx, closer) = {
            let state = self.inner.state.lock();
            if state.closer.is_cancelled() || state.torn_down {
                return Err(SessionError::Closed);
            }
            let Some(wq) = state.wq.as_ref() else {
                return Err(SessionError::Closed);
            };
            (wq.tx.clone(), state.closer.clone())
        };

        let timeout = if timeout.is_zero() { DEFAULT_WRITE_PKG_TIMEOUT } else { timeout };
        let pkg = pkg.into();

        tokio::select! {
            biased;
            () = closer.cancelled() => Err(SessionError::Closed),
            sent = tx.send(pkg) => sent.map_err(|_| SessionError::Closed),
            () = self.inner.wheel.after(timeout) => {
                warn!(session = %self.token(), ?timeout, "write queue full");
                Err(SessionError::Blocked)
            }
        }
    }

    /// Write bytes straight to the connection, bypassing the write queue.
    ///
    /// Allowed while the session is draining so writers can flush queued
    /// packages.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` once the session is torn down
    /// - `SessionError::Transport` if the write fails
    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<usize, SessionError> {
        self.ensure_live()?;
        let transport = self.transport();
        let written = transport.as_connection().write(bytes).await?;
        self.inner.stats.add_write_bytes(written);
        Ok(written)
    }

    /// Write several buffers as one physical write.
    ///
    /// # Errors
    ///
    /// Same as [`Session::write_bytes`].
    pub async fn write_bytes_array(&self, bufs: &[&[u8]]) -> Result<usize, SessionError> {
        match bufs {
            [] => Ok(0),
            [single] => self.write_bytes(single).await,
            _ => {
                let total = bufs.iter().map(|buf| buf.len()).sum();
                let mut joined = BytesMut::with_capacity(total);
                for buf in bufs {
                    joined.extend_from_slice(buf);
                }
                self.write_bytes(&joined).await
            },
        }
    }

    /// Send one datagram to `peer`.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` once the session is torn down
    /// - `SessionError::Transport` on a non-datagram session or if the send
    ///   fails
    pub async fn write_bytes_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<usize, SessionError> {
        self.ensure_live()?;
        let Transport::Datagram(conn) = self.transport() else {
            return Err(TransportError::Protocol(format!(
                "{} session cannot address individual peers",
                self.kind()
            ))
            .into());
        };
        let written = conn.send_to(bytes, peer).await?;
        self.inner.stats.add_write_bytes(written);
        Ok(written)
    }

    /// Human-readable counters.
    pub fn stat(&self) -> String {
        let stats = self.stats();
        format!(
            "session {}, Read Count: {}, Write Count: {}, Read Pkg Count: {}, Write Pkg Count: {}",
            self.token(),
            stats.read_bytes,
            stats.write_bytes,
            stats.read_pkgs,
            stats.write_pkgs
        )
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns true once the close signal has fired.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closer.is_cancelled()
    }

    /// Lifecycle position.
    pub fn state(&self) -> SessionState {
        let state = self.inner.state.lock();
        if state.torn_down {
            SessionState::Closed
        } else if state.closer.is_cancelled() {
            SessionState::Closing
        } else if state.running {
            SessionState::Running
        } else {
            SessionState::Created
        }
    }

    /// When the session last opened or produced a package.
    pub fn last_active(&self) -> Instant {
        *self.inner.last_active.lock()
    }

    /// Wait until the close signal fires.
    pub async fn closed(&self) {
        let closer = self.inner.state.lock().closer.clone();
        closer.cancelled().await;
    }

    /// Request shutdown. Safe to call from any number of callers; returns
    /// without waiting for the drain.
    pub fn close(&self) {
        if self.stop() {
            info!(session = %self.token(), "session close requested");
        }
    }

    /// Start the dispatch and I/O tasks.
    ///
    /// Calls `on_open` first; if it fails the session is torn down without
    /// dispatching anything and `on_close` is not called.
    ///
    /// # Errors
    ///
    /// - `SessionError::Closed` if the session is torn down and not reset
    /// - The `on_open` error, if the listener refused the session
    ///
    /// # Panics
    ///
    /// Panics if either queue, the listener, or the writer is missing, or
    /// the reader for stream and datagram transports, or if the session is
    /// already running. These are configuration faults.
    #[allow(clippy::panic)]
    pub async fn run(&self) -> Result<(), SessionError> {
        let token = self.token();
        let needs_reader = self.kind() != TransportKind::Framed;

        let (rq, wq, listener) = {
            let mut state = self.inner.state.lock();
            if state.torn_down {
                return Err(SessionError::Closed);
            }
            assert!(!state.running, "session {token}: already running");
            assert!(state.writer.is_some(), "session {token}: writer must be set before run");
            assert!(
                !needs_reader || state.reader.is_some(),
                "session {token}: reader must be set before run"
            );

            let listener = state.listener.clone();
            let rq = state.rq.as_mut().and_then(|queue| queue.rx.take());
            let wq = state.wq.as_mut().and_then(|queue| queue.rx.take());
            let (Some(rq), Some(wq), Some(listener)) = (rq, wq, listener) else {
                panic!("session {token}: read queue, write queue and listener must be set before run");
            };

            state.running = true;
            (rq, wq, listener)
        };

        self.update_active();
        if let Err(err) = listener.on_open(self).await {
            warn!(session = %token, error = %err, "listener refused session");
            self.stop();
            self.gc().await;
            return Err(err);
        }

        self.inner.active_tasks.store(SESSION_TASKS, Ordering::SeqCst);
        tokio::spawn(self.clone().dispatch_task(rq, wq, Arc::clone(&listener)));
        tokio::spawn(self.clone().io_task(listener));

        debug!(session = %token, kind = %self.kind(), role = %self.role(), "session running");
        Ok(())
    }

    /// Fire the close signal and pull the transport deadlines in.
    ///
    /// Returns true for the one call that actually fired the signal.
    pub(crate) fn stop(&self) -> bool {
        let state = self.inner.state.lock();
        if state.closer.is_cancelled() {
            return false;
        }

        let deadline = self.inner.wheel.now() + state.wait;
        let transport = self.transport();
        let conn = transport.as_connection();
        conn.set_read_deadline(deadline);
        conn.set_write_deadline(deadline);
        state.closer.cancel();
        true
    }

    /// Release everything the session holds. Runs its effects once.
    async fn gc(&self) {
        let linger = {
            let mut state = self.inner.state.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.attrs = None;
            state.rq = None;
            state.wq = None;
            state.wait
        };

        let transport = self.transport();
        transport.as_connection().close(linger).await;
        debug!(session = %self.token(), "session torn down");
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.inner.state.lock().torn_down {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn update_active(&self) {
        *self.inner.last_active.lock() = self.inner.wheel.now();
    }
}

impl<P: Send + 'static> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token())
            .field("role", &self.role())
            .field("state", &self.state())
            .finish()
    }
}

fn fmt_addr(addr: Option<SocketAddr>) -> String {
    addr.map_or_else(|| "-".to_owned(), |addr| addr.to_string())
}

fn log_panic(token: &str, task: &'static str, payload: &(dyn Any + Send)) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    let backtrace = Backtrace::force_capture();

    error!(session = %token, task, panic = %message, %backtrace, "session task panicked");
}
