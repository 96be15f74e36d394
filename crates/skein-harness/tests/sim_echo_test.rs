//! Echo sessions over turmoil's simulated TCP.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use skein_core::SessionConfig;
use skein_harness::{
    RecordingListener,
    sim::{dial, serve_echo},
    wait_until,
};
use skein_server::echo::EchoCodec;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use turmoil::net::TcpStream;

/// Must match `sim::ECHO_PORT`.
const SERVER: &str = "server:7070";

fn echo_sim() -> turmoil::Sim<'static> {
    let mut sim = turmoil::Builder::new().build();
    sim.host("server", || serve_echo(SessionConfig::default()));
    sim
}

#[test]
fn raw_client_gets_lines_back() {
    let mut sim = echo_sim();

    sim.client("client", async {
        let mut stream = TcpStream::connect(SERVER).await?;

        stream.write_all(b"hel").await?;
        stream.write_all(b"lo\nworld\n").await?;

        let mut buf = [0u8; 12];
        stream.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"hello\nworld\n");

        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn client_session_round_trip() {
    let mut sim = echo_sim();

    sim.client("client", async {
        let session = dial("server", &SessionConfig::default()).await?;
        let listener = RecordingListener::<Bytes>::new();
        session.set_pkg_handler(Arc::new(EchoCodec));
        session.set_event_listener(listener.clone());
        session.run().await?;

        session.write_pkg(Bytes::from_static(b"ping\n"), Duration::from_secs(1)).await?;
        assert!(wait_until(Duration::from_secs(5), || listener.message_count() == 1).await);
        assert_eq!(listener.packages(), vec![Bytes::from_static(b"ping\n")]);

        session.close();
        assert!(wait_until(Duration::from_secs(5), || session.is_closed()).await);
        assert_eq!(listener.closes(), 1);

        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn held_link_delays_but_does_not_lose_messages() {
    let mut sim = echo_sim();

    sim.client("client", async {
        let mut stream = TcpStream::connect(SERVER).await?;

        turmoil::hold("client", "server");
        stream.write_all(b"late\n").await?;

        let mut buf = [0u8; 5];
        let early = tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf)).await;
        assert!(early.is_err(), "echo arrived through a held link");

        turmoil::release("client", "server");
        stream.read_exact(&mut buf).await?;
        assert_eq!(&buf, b"late\n");

        Ok(())
    });

    sim.run().expect("simulation failed");
}

#[test]
fn many_clients_are_served_independently() {
    let mut sim = echo_sim();

    for i in 0..3 {
        let line = format!("client {i}\n");
        sim.client(format!("client{i}"), async move {
            let mut stream = TcpStream::connect(SERVER).await?;
            stream.write_all(line.as_bytes()).await?;

            let mut buf = vec![0u8; line.len()];
            stream.read_exact(&mut buf).await?;
            assert_eq!(buf, line.as_bytes());

            Ok(())
        });
    }

    sim.run().expect("simulation failed");
}
