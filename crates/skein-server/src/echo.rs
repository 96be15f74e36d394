//! Echo service used by the `skein-echo` binary.
//!
//! Stream sessions echo newline-terminated lines; datagram and framed
//! sessions echo each datagram or frame whole. Datagram replies go back to
//! the sender.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use skein_core::{
    CodecError, EventListener, Incoming, Outgoing, Reader, Session, SessionError, TransportKind,
    Writer,
};

/// Line codec for streams, whole-unit codec for datagrams and frames.
#[derive(Debug, Default)]
pub struct EchoCodec;

impl Reader<Bytes> for EchoCodec {
    fn read(&self, session: &Session<Bytes>, data: &[u8]) -> Result<(Option<Bytes>, usize), CodecError> {
        match session.kind() {
            TransportKind::Datagram | TransportKind::Framed => {
                Ok((Some(Bytes::copy_from_slice(data)), data.len()))
            },
            TransportKind::Stream => match data.iter().position(|&b| b == b'\n') {
                Some(end) => Ok((Some(Bytes::copy_from_slice(&data[..=end])), end + 1)),
                // Report what is buffered so an endless line trips the length limit.
                None => Ok((None, data.len())),
            },
        }
    }
}

#[async_trait]
impl Writer<Bytes> for EchoCodec {
    async fn write(&self, session: &Session<Bytes>, pkg: Outgoing<Bytes>) -> Result<(), SessionError> {
        match pkg {
            Outgoing::Package(bytes) => session.write_bytes(&bytes).await?,
            Outgoing::Datagram(ctx) => session.write_bytes_to(&ctx.package, ctx.peer).await?,
        };
        Ok(())
    }
}

/// Sends every message back where it came from.
#[derive(Debug, Default)]
pub struct EchoListener;

#[async_trait]
impl EventListener<Bytes> for EchoListener {
    async fn on_open(&self, session: &Session<Bytes>) -> Result<(), SessionError> {
        tracing::info!(session = %session.token(), "session opened");
        Ok(())
    }

    async fn on_message(&self, session: &Session<Bytes>, msg: Incoming<Bytes>) {
        let reply = match msg {
            Incoming::Package(bytes) | Incoming::Frame(bytes) => Outgoing::Package(bytes),
            Incoming::Datagram(ctx) => Outgoing::Datagram(ctx),
        };
        if let Err(e) = session.write_pkg(reply, Duration::ZERO).await {
            tracing::warn!(session = %session.token(), error = %e, "echo dropped");
        }
    }

    async fn on_cron(&self, session: &Session<Bytes>) {
        tracing::debug!("{}", session.stat());
    }

    async fn on_error(&self, session: &Session<Bytes>, err: &SessionError) {
        tracing::warn!(session = %session.token(), error = %err, "session error");
    }

    async fn on_close(&self, session: &Session<Bytes>) {
        tracing::info!("{}", session.stat());
    }
}

/// Install the echo codec and listener on a new session.
pub fn install(session: &Session<Bytes>) -> Result<(), SessionError> {
    session.set_pkg_handler(Arc::new(EchoCodec));
    session.set_event_listener(Arc::new(EchoListener));
    Ok(())
}
