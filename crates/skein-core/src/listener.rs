//! Application event callbacks.

use async_trait::async_trait;

use crate::{codec::Incoming, error::SessionError, session::Session};

/// Callbacks invoked by a session's tasks.
///
/// `on_message`, `on_cron` and `on_close` run on the dispatch task, so a slow
/// callback delays queued writes. `on_error` runs on the I/O task. Ordering
/// across event kinds is not defined: a cron tick may arrive between two
/// messages.
///
/// # Invariants
///
/// - `on_open` runs exactly once per `run()`, before any other callback
/// - `on_close` runs at most once per `run()`, and never if `on_open` failed
/// - The fault that ends the I/O task is reported through `on_error` once.
///   Datagram sessions also report oversized datagrams they skip.
#[async_trait]
pub trait EventListener<P: Send + 'static>: Send + Sync + 'static {
    /// Session is about to start. An error aborts startup and closes the
    /// session without dispatching anything.
    async fn on_open(&self, _session: &Session<P>) -> Result<(), SessionError> {
        Ok(())
    }

    /// One decoded item, in decode order.
    async fn on_message(&self, session: &Session<P>, msg: Incoming<P>);

    /// Periodic heartbeat, at most once per cron period.
    async fn on_cron(&self, _session: &Session<P>) {}

    /// Unrecoverable I/O or decode fault.
    async fn on_error(&self, _session: &Session<P>, _err: &SessionError) {}

    /// Session has finished draining.
    async fn on_close(&self, _session: &Session<P>) {}
}
