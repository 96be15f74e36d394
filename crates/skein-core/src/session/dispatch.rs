//! Dispatch task: multiplexes close, queues and cron.

use std::{panic::AssertUnwindSafe, sync::Arc, sync::atomic::Ordering};

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Session, log_panic};
use crate::{
    codec::{Incoming, Outgoing},
    connection::Transport,
    listener::EventListener,
    timer::Sleep,
};

/// Active tasks left once only the dispatch task remains.
///
/// Raise this if a session ever runs more than two tasks.
const TASKS_REMAINING_AT_CLOSE: usize = 1;

impl<P: Send + 'static> Session<P> {
    pub(super) async fn dispatch_task(
        self,
        rq: mpsc::Receiver<Incoming<P>>,
        wq: mpsc::Receiver<Outgoing<P>>,
        listener: Arc<dyn EventListener<P>>,
    ) {
        let token = self.token();

        let outcome =
            AssertUnwindSafe(self.dispatch_loop(rq, wq, listener.as_ref(), &token)).catch_unwind().await;
        if let Err(panic) = outcome {
            log_panic(&token, "dispatch", panic.as_ref());
            self.stop();
        }

        // Teardown releases the socket, so the I/O task must be gone first.
        while self.inner.active_tasks.load(Ordering::SeqCst) > TASKS_REMAINING_AT_CLOSE {
            self.inner.task_exit.notified().await;
        }
        self.inner.active_tasks.fetch_sub(1, Ordering::SeqCst);

        if let Err(panic) = AssertUnwindSafe(listener.on_close(&self)).catch_unwind().await {
            log_panic(&token, "dispatch", panic.as_ref());
        }

        self.gc().await;
        info!(session = %token, stats = %self.stat(), "session finished");
    }

    async fn dispatch_loop(
        &self,
        mut rq: mpsc::Receiver<Incoming<P>>,
        mut wq: mpsc::Receiver<Outgoing<P>>,
        listener: &dyn EventListener<P>,
        token: &str,
    ) {
        let (closer, writer) = {
            let state = self.inner.state.lock();
            (state.closer.clone(), state.writer.clone())
        };
        let Some(writer) = writer else {
            error!(session = %token, "dispatch started without a writer");
            self.stop();
            return;
        };

        let wheel = Arc::clone(&self.inner.wheel);
        let mut cron: Sleep = wheel.after(self.cron_period());
        let mut grace: Sleep = Box::pin(std::future::pending());
        let mut closing = false;
        let mut expired = false;
        let mut healthy = true;

        loop {
            if closing
                && self.inner.active_tasks.load(Ordering::SeqCst) <= TASKS_REMAINING_AT_CLOSE
                && (expired || (rq.is_empty() && wq.is_empty()))
            {
                if expired {
                    warn!(
                        session = %token,
                        reads = rq.len(),
                        writes = wq.len(),
                        "wait time elapsed, discarding queued items"
                    );
                } else {
                    debug!(session = %token, "queues drained");
                }
                break;
            }

            tokio::select! {
                () = closer.cancelled(), if !closing => {
                    closing = true;
                    grace = wheel.after(self.wait_time());
                    debug!(session = %token, "close signal observed, draining");
                }

                Some(msg) = rq.recv() => {
                    if healthy && !expired {
                        listener.on_message(self, msg).await;
                        self.inner.stats.incr_read_pkgs();
                    } else {
                        info!(session = %token, "session ending, dropping inbound package");
                    }
                }

                Some(pkg) = wq.recv() => {
                    if healthy && !expired {
                        match writer.write(self, pkg).await {
                            Ok(()) => self.inner.stats.incr_write_pkgs(),
                            Err(err) => {
                                error!(session = %token, error = %err, "writer failed");
                                healthy = false;
                                self.stop();
                            },
                        }
                    } else {
                        info!(session = %token, "session ending, dropping outbound package");
                    }
                }

                () = &mut cron, if !closing => {
                    if healthy {
                        if let Transport::Framed(conn) = self.transport()
                            && let Err(err) = conn.write_ping().await
                        {
                            warn!(session = %token, error = %err, "keepalive ping failed");
                        }
                        listener.on_cron(self).await;
                    }
                    cron = wheel.after(self.cron_period());
                }

                () = self.inner.task_exit.notified(), if closing => {}

                // Stop draining; teardown still waits for the I/O task.
                () = &mut grace, if closing && !expired => {
                    expired = true;
                    debug!(session = %token, "wait time elapsed, waiting for reader to exit");
                }
            }
        }
    }
}
