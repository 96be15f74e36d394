//! Client connector.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
};

use skein_core::{EndpointRole, Session, SessionConfig, Transport, TransportKind};
use tokio::net::{TcpStream, UdpSocket};

use crate::{
    config::parse_addr,
    error::ServerError,
    transport::{FramedConn, StreamConn, UdpConn, tune_tcp},
};

/// Dial `address` and return a client-role session with `config` applied.
///
/// The session is not running yet: install a listener and codec, then call
/// [`Session::run`].
pub async fn connect<P: Send + 'static>(
    address: &str,
    kind: TransportKind,
    config: &SessionConfig,
) -> Result<Session<P>, ServerError> {
    config.validate()?;
    let addr = parse_addr(address)?;

    let transport = match kind {
        TransportKind::Stream => {
            let stream = dial_tcp(addr, config).await?;
            Transport::Stream(Arc::new(StreamConn::tcp(stream)))
        },
        TransportKind::Framed => {
            let stream = dial_tcp(addr, config).await?;
            Transport::Framed(Arc::new(FramedConn::tcp(stream)))
        },
        TransportKind::Datagram => {
            let local = if addr.is_ipv4() {
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
            } else {
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
            };
            let socket = UdpSocket::bind(local).await?;
            socket
                .connect(addr)
                .await
                .map_err(|e| ServerError::Transport(format!("failed to connect {addr}: {e}")))?;
            Transport::Datagram(Arc::new(UdpConn::new(Arc::new(socket), Some(addr))))
        },
    };

    let session = Session::new(EndpointRole::Client, transport);
    config.apply(&session)?;
    tracing::debug!(session = %session.token(), "connected");
    Ok(session)
}

async fn dial_tcp(addr: SocketAddr, config: &SessionConfig) -> Result<TcpStream, ServerError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ServerError::Transport(format!("failed to connect {addr}: {e}")))?;
    tune_tcp(&stream, config)?;
    Ok(stream)
}
