//! Server endpoint: one session per accepted connection.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use skein_core::{EndpointRole, Session, SessionConfig, SessionError, Transport, TransportKind};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::{
    config::ServerRuntimeConfig,
    error::ServerError,
    transport::{FramedConn, StreamConn, UdpConn, tune_tcp},
};

/// First pause after a failed `accept()`.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

/// Longest pause between `accept()` retries.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

enum Bound {
    Stream(TcpListener),
    Framed(TcpListener),
    Datagram(Arc<UdpSocket>),
}

/// Listening endpoint.
///
/// Stream and framed endpoints create a server-role session for every
/// accepted TCP connection. A datagram endpoint has a single session for its
/// socket; replies are addressed per peer.
pub struct Server {
    config: ServerRuntimeConfig,
    bound: Bound,
}

impl Server {
    /// Validate the configuration and bind.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.bind_addr()?;

        let bound = match config.transport {
            TransportKind::Stream => Bound::Stream(bind_tcp(addr).await?),
            TransportKind::Framed => Bound::Framed(bind_tcp(addr).await?),
            TransportKind::Datagram => {
                let socket = UdpSocket::bind(addr)
                    .await
                    .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;
                Bound::Datagram(Arc::new(socket))
            },
        };

        tracing::info!(%addr, transport = %config.transport, "server bound");
        Ok(Self { config, bound })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        let addr = match &self.bound {
            Bound::Stream(listener) | Bound::Framed(listener) => listener.local_addr(),
            Bound::Datagram(socket) => socket.local_addr(),
        };
        addr.map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Serve until the endpoint fails.
    ///
    /// `new_session` runs for every new session after the configured
    /// settings are applied and before `run()`. It must install the
    /// listener and codec; an error closes the connection instead.
    ///
    /// Stream and framed endpoints accept forever. A datagram endpoint
    /// returns once its session closes.
    pub async fn run<P, F>(self, new_session: F) -> Result<(), ServerError>
    where
        P: Send + 'static,
        F: Fn(&Session<P>) -> Result<(), SessionError> + Send + Sync + 'static,
    {
        let new_session = Arc::new(new_session);
        let config = Arc::new(self.config.session);

        match self.bound {
            Bound::Stream(listener) => {
                accept_loop(listener, config, new_session, |stream| {
                    Transport::Stream(Arc::new(StreamConn::tcp(stream)))
                })
                .await
            },
            Bound::Framed(listener) => {
                accept_loop(listener, config, new_session, |stream| {
                    Transport::Framed(Arc::new(FramedConn::tcp(stream)))
                })
                .await
            },
            Bound::Datagram(socket) => {
                let conn = UdpConn::new(socket, None);
                let session = Session::new(EndpointRole::Server, Transport::Datagram(Arc::new(conn)));
                start_session(&session, &config, new_session.as_ref()).await?;
                session.closed().await;
                Ok(())
            },
        }
    }
}

async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))
}

async fn accept_loop<P, F>(
    listener: TcpListener,
    config: Arc<SessionConfig>,
    new_session: Arc<F>,
    wrap: fn(TcpStream) -> Transport,
) -> Result<(), ServerError>
where
    P: Send + 'static,
    F: Fn(&Session<P>) -> Result<(), SessionError> + Send + Sync + 'static,
{
    let mut backoff = None;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                backoff = None;
                if let Err(e) = tune_tcp(&stream, &config) {
                    tracing::warn!(%peer, "failed to apply socket options: {e}");
                }

                let session = Session::new(EndpointRole::Server, wrap(stream));
                let config = Arc::clone(&config);
                let new_session = Arc::clone(&new_session);

                tokio::spawn(async move {
                    if let Err(e) = start_session(&session, &config, new_session.as_ref()).await {
                        tracing::debug!(%peer, "session not started: {e}");
                    }
                });
            },
            // Persistent failures (fd exhaustion) would otherwise spin.
            Err(e) => {
                let pause = next_backoff(backoff);
                backoff = Some(pause);
                tracing::error!(retry_in = ?pause, "Accept error: {}", e);
                tokio::time::sleep(pause).await;
            },
        }
    }
}

/// Apply settings, hand the session to the application, start it.
pub(crate) async fn start_session<P, F>(
    session: &Session<P>,
    config: &SessionConfig,
    new_session: &F,
) -> Result<(), ServerError>
where
    P: Send + 'static,
    F: Fn(&Session<P>) -> Result<(), SessionError>,
{
    config.apply(session)?;

    if let Err(e) = new_session(session) {
        tracing::warn!(session = %session.token(), error = %e, "session setup rejected");
        session.transport().as_connection().close(config.wait_timeout).await;
        return Err(e.into());
    }

    session.run().await?;
    Ok(())
}

fn next_backoff(previous: Option<Duration>) -> Duration {
    previous.map_or(ACCEPT_BACKOFF_MIN, |pause| (pause * 2).min(ACCEPT_BACKOFF_MAX))
}
