//! Listener that records every callback.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use skein_core::{EventListener, Incoming, Session, SessionError};
use tokio::time::Instant;

/// Records opens, messages, cron ticks, errors and closes.
///
/// All accessors return snapshots; callbacks may still be running.
pub struct RecordingListener<P> {
    reject_open: bool,
    opens: AtomicUsize,
    messages: Mutex<Vec<Incoming<P>>>,
    crons: Mutex<Vec<Instant>>,
    errors: Mutex<Vec<SessionError>>,
    closes: AtomicUsize,
}

impl<P: Send + 'static> RecordingListener<P> {
    /// Listener that accepts the session.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(false))
    }

    /// Listener whose `on_open` refuses the session.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self::build(true))
    }

    fn build(reject_open: bool) -> Self {
        Self {
            reject_open,
            opens: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
            crons: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    /// `on_open` calls.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// `on_close` calls.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Number of messages received.
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// When each cron callback ran.
    pub fn crons(&self) -> Vec<Instant> {
        self.crons.lock().clone()
    }

    /// Errors reported through `on_error`.
    pub fn errors(&self) -> Vec<SessionError> {
        self.errors.lock().clone()
    }
}

impl<P: Clone + Send + 'static> RecordingListener<P> {
    /// Messages received, in order.
    pub fn messages(&self) -> Vec<Incoming<P>> {
        self.messages.lock().clone()
    }

    /// Decoded packages received, in order. Raw frames are skipped.
    pub fn packages(&self) -> Vec<P> {
        self.messages.lock().iter().filter_map(|msg| msg.package().cloned()).collect()
    }
}

#[async_trait]
impl<P: Send + 'static> EventListener<P> for RecordingListener<P> {
    async fn on_open(&self, _session: &Session<P>) -> Result<(), SessionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.reject_open {
            return Err(SessionError::Rejected("recording listener refuses".to_string()));
        }
        Ok(())
    }

    async fn on_message(&self, _session: &Session<P>, msg: Incoming<P>) {
        self.messages.lock().push(msg);
    }

    async fn on_cron(&self, _session: &Session<P>) {
        self.crons.lock().push(Instant::now());
    }

    async fn on_error(&self, _session: &Session<P>, err: &SessionError) {
        self.errors.lock().push(err.clone());
    }

    async fn on_close(&self, _session: &Session<P>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `done` every few milliseconds until it holds or `within` passes.
///
/// Returns whether `done` held. Under a paused clock the wait costs no real
/// time.
pub async fn wait_until(within: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
