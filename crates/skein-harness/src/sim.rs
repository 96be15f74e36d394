//! Turmoil-backed hosts.
//!
//! The production [`StreamConn`] is generic over its byte stream, so the
//! simulated network runs the same connection code as a real socket.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bytes::Bytes;
use skein_core::{EndpointRole, Session, SessionConfig, Transport};
use skein_server::{StreamConn, echo};
use turmoil::net::{TcpListener, TcpStream};

/// Port the simulated echo host listens on.
pub const ECHO_PORT: u16 = 7070;

/// Wrap a simulated TCP stream as a session transport.
pub fn sim_transport(stream: TcpStream) -> Transport {
    let local = stream.local_addr().ok();
    let remote = stream.peer_addr().ok();
    Transport::Stream(Arc::new(StreamConn::new(stream, local, remote)))
}

/// Host body: accept forever, running an echo session per connection.
pub async fn serve_echo(config: SessionConfig) -> turmoil::Result {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, ECHO_PORT))).await?;

    loop {
        let (stream, peer) = listener.accept().await?;
        let session: Session<Bytes> = Session::new(EndpointRole::Server, sim_transport(stream));
        config.apply(&session)?;
        echo::install(&session)?;
        session.run().await?;
        tracing::debug!(%peer, session = %session.token(), "simulated session started");
    }
}

/// Dial the echo host and return a client session with `config` applied.
pub async fn dial(host: &str, config: &SessionConfig) -> turmoil::Result<Session<Bytes>> {
    let addr = format!("{host}:{ECHO_PORT}");
    let stream = TcpStream::connect(addr.as_str()).await?;
    let session = Session::new(EndpointRole::Client, sim_transport(stream));
    config.apply(&session)?;
    Ok(session)
}
