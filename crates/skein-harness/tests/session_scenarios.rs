//! Session behavior over scripted connections.
//!
//! All tests run on a paused clock, so timeouts and grace periods elapse
//! instantly while keeping their ordering.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use skein_core::{
    CodecError, EndpointRole, EventListener, Incoming, Outgoing, Session, SessionConfig,
    SessionError, SessionState, Transport, TransportError, UdpContext,
};
use skein_harness::{
    ExactCodec, LengthPrefixCodec, RecordingListener, ScriptedDatagram, ScriptedFramed,
    ScriptedStream, wait_until,
};
use tokio::time::Instant;

const PATIENCE: Duration = Duration::from_secs(30);

fn peer(port: u16) -> SocketAddr {
    SocketAddr::from(([192, 168, 1, 10], port))
}

fn configure(session: &Session<Bytes>, listener: &Arc<RecordingListener<Bytes>>) {
    session.set_event_listener(listener.clone());
    session.set_rq_len(8);
    session.set_wq_len(8);
}

fn stream_session(
    conn: &Arc<ScriptedStream>,
    role: EndpointRole,
) -> (Session<Bytes>, Arc<RecordingListener<Bytes>>) {
    let listener = RecordingListener::new();
    let session = Session::new(role, Transport::Stream(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    configure(&session, &listener);
    (session, listener)
}

fn datagram_session(conn: &Arc<ScriptedDatagram>) -> (Session<Bytes>, Arc<RecordingListener<Bytes>>) {
    let listener = RecordingListener::new();
    let session = Session::new(EndpointRole::Server, Transport::Datagram(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    configure(&session, &listener);
    (session, listener)
}

async fn closed(session: &Session<Bytes>) -> bool {
    wait_until(PATIENCE, || session.state() == SessionState::Closed).await
}

#[tokio::test(start_paused = true)]
async fn coalesced_writes_decode_as_one_package() {
    let (client_conn, server_conn) = ScriptedStream::pair();
    let exact = Arc::new(ExactCodec::new(Bytes::from_static(b"AB")));

    let server_listener = RecordingListener::new();
    let server = Session::new(EndpointRole::Server, Transport::Stream(server_conn.clone()));
    server.set_pkg_handler(Arc::clone(&exact));
    configure(&server, &server_listener);
    server.run().await.expect("server run failed");

    let client_listener = RecordingListener::new();
    let client = Session::new(EndpointRole::Client, Transport::Stream(client_conn.clone()));
    client.set_pkg_handler(exact);
    configure(&client, &client_listener);
    client.run().await.expect("client run failed");

    client.write_bytes(b"A").await.expect("write failed");
    client.write_bytes(b"B").await.expect("write failed");

    assert!(wait_until(PATIENCE, || server_listener.message_count() == 1).await);
    assert_eq!(server_listener.packages(), vec![Bytes::from_static(b"AB")]);
    assert_eq!(server_conn.reads(), 1);
    assert_eq!(server_listener.opens(), 1);

    client.close();
    assert!(closed(&client).await);
    assert!(closed(&server).await, "peer close should end the server session");
    assert_eq!(server_listener.closes(), 1);
    assert!(server_listener.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_write_queue_blocks_after_timeout() {
    let conn = ScriptedStream::new();
    let (session, _listener) = stream_session(&conn, EndpointRole::Client);
    session.set_wq_len(3);

    for i in 0..3u8 {
        session
            .write_pkg(Bytes::from(vec![i]), Duration::from_millis(250))
            .await
            .expect("queue has room");
    }

    let start = Instant::now();
    let result = session.write_pkg(Bytes::from_static(b"x"), Duration::from_millis(250)).await;

    assert_eq!(result, Err(SessionError::Blocked));
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_waits_one_second() {
    let conn = ScriptedStream::new();
    let (session, _listener) = stream_session(&conn, EndpointRole::Client);
    session.set_wq_len(1);

    session.write_pkg(Bytes::from_static(b"a"), Duration::ZERO).await.expect("queue has room");

    let start = Instant::now();
    let result = session.write_pkg(Bytes::from_static(b"b"), Duration::ZERO).await;

    assert_eq!(result, Err(SessionError::Blocked));
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert!(start.elapsed() < Duration::from_millis(1200));
}

#[tokio::test(start_paused = true)]
async fn stalled_writer_backs_up_the_queue() {
    let conn = ScriptedStream::new();
    conn.set_write_delay(Duration::from_secs(10));
    let (session, _listener) = stream_session(&conn, EndpointRole::Client);
    session.set_wq_len(1);
    session.run().await.expect("run failed");

    session.write_pkg(Bytes::from_static(b"1"), Duration::ZERO).await.expect("first fits");
    // Let dispatch take the first package into the stalled writer.
    tokio::time::sleep(Duration::from_millis(10)).await;
    session.write_pkg(Bytes::from_static(b"2"), Duration::ZERO).await.expect("second fits");

    let result = session.write_pkg(Bytes::from_static(b"3"), Duration::from_millis(500)).await;
    assert_eq!(result, Err(SessionError::Blocked));
}

#[tokio::test(start_paused = true)]
async fn queued_writes_are_flushed_on_close() {
    let conn = ScriptedStream::new();
    let (session, listener) = stream_session(&conn, EndpointRole::Client);
    session.run().await.expect("run failed");

    session.write_pkg(Bytes::from_static(b"one"), Duration::ZERO).await.expect("write failed");
    session.write_pkg(Bytes::from_static(b"two"), Duration::ZERO).await.expect("write failed");
    session.close();

    assert!(closed(&session).await);
    let mut expected = LengthPrefixCodec::encode(b"one");
    expected.extend(LengthPrefixCodec::encode(b"two"));
    assert_eq!(conn.written(), expected);
    assert_eq!(session.stats().write_pkgs, 2);
    assert_eq!(listener.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn datagrams_pair_each_package_with_its_sender() {
    let orders = [[peer(4001), peer(4002)], [peer(4002), peer(4001)]];

    for order in orders {
        let conn = ScriptedDatagram::new(None);
        let (session, listener) = datagram_session(&conn);
        session.run().await.expect("run failed");

        for from in order {
            let payload = format!("from {}", from.port());
            conn.push(from, &LengthPrefixCodec::encode(payload.as_bytes()));
        }

        assert!(wait_until(PATIENCE, || listener.message_count() == 2).await);
        let mut seen: Vec<(SocketAddr, Bytes)> = listener
            .messages()
            .into_iter()
            .filter_map(|msg| match msg {
                Incoming::Datagram(UdpContext { package, peer }) => Some((peer, package)),
                Incoming::Package(_) | Incoming::Frame(_) => None,
            })
            .collect();
        seen.sort();

        assert_eq!(seen, vec![
            (peer(4001), Bytes::from_static(b"from 4001")),
            (peer(4002), Bytes::from_static(b"from 4002")),
        ]);

        session.close();
        assert!(closed(&session).await);
    }
}

#[tokio::test(start_paused = true)]
async fn datagram_replies_go_to_the_named_peer() {
    let conn = ScriptedDatagram::new(None);
    let (session, _listener) = datagram_session(&conn);
    session.run().await.expect("run failed");

    let reply = Outgoing::Datagram(UdpContext { package: Bytes::from_static(b"pong"), peer: peer(5000) });
    session.write_pkg(reply, Duration::ZERO).await.expect("write failed");

    assert!(wait_until(PATIENCE, || conn.sent().len() == 1).await);
    assert_eq!(conn.sent(), vec![(Bytes::from(LengthPrefixCodec::encode(b"pong")), peer(5000))]);
}

#[tokio::test(start_paused = true)]
async fn oversized_stream_message_is_never_delivered() {
    let conn = ScriptedStream::new();
    let (session, listener) = stream_session(&conn, EndpointRole::Server);
    session.set_max_msg_len(16);
    session.run().await.expect("run failed");

    // Prefix plus a few body bytes: the declared length alone is too long.
    let wire = LengthPrefixCodec::encode(&[7u8; 100]);
    conn.push(&wire[..10]);

    assert!(closed(&session).await);
    assert_eq!(listener.errors(), vec![SessionError::MsgTooLong { len: 104, max: 16 }]);
    assert_eq!(listener.message_count(), 0);
    assert_eq!(listener.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn oversized_datagram_is_skipped_and_reported() {
    let conn = ScriptedDatagram::new(None);
    let (session, listener) = datagram_session(&conn);
    session.set_max_msg_len(16);
    session.run().await.expect("run failed");

    conn.push(peer(4001), &LengthPrefixCodec::encode(&[1u8; 40]));
    conn.push(peer(4001), &LengthPrefixCodec::encode(b"ok"));

    assert!(wait_until(PATIENCE, || listener.message_count() == 1).await);
    assert_eq!(listener.packages(), vec![Bytes::from_static(b"ok")]);
    assert_eq!(listener.errors(), vec![SessionError::MsgTooLong { len: 44, max: 16 }]);
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test(start_paused = true)]
async fn undecodable_datagrams_are_skipped_without_a_limit() {
    let conn = ScriptedDatagram::new(None);
    let listener = RecordingListener::new();
    let session = Session::new(EndpointRole::Server, Transport::Datagram(conn.clone()));
    session.set_pkg_handler(Arc::new(ExactCodec::new(Bytes::from_static(b"AB"))));
    configure(&session, &listener);
    session.run().await.expect("run failed");

    for _ in 0..5 {
        conn.push(peer(4001), b"zz");
    }
    conn.push(peer(4001), b"AB");

    assert!(wait_until(PATIENCE, || listener.message_count() == 1).await);
    assert!(listener.errors().is_empty());
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test(start_paused = true)]
async fn datagram_error_limit_ends_the_session() {
    let conn = ScriptedDatagram::new(None);
    let listener = RecordingListener::new();
    let session = Session::new(EndpointRole::Server, Transport::Datagram(conn.clone()));
    session.set_pkg_handler(Arc::new(ExactCodec::new(Bytes::from_static(b"AB"))));
    session.set_datagram_error_limit(Some(3));
    configure(&session, &listener);
    session.run().await.expect("run failed");

    conn.push(peer(4001), b"zz");
    conn.push(peer(4001), b"AB");
    for _ in 0..3 {
        conn.push(peer(4001), b"zz");
    }

    assert!(closed(&session).await);
    assert_eq!(listener.packages(), vec![Bytes::from_static(b"AB")]);
    let errors = listener.errors();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], SessionError::Codec(CodecError::Malformed(_))));
}

#[tokio::test(start_paused = true)]
async fn framed_session_without_reader_delivers_raw_frames() {
    let conn = ScriptedFramed::new();
    let listener = RecordingListener::new();
    let session = Session::new(EndpointRole::Server, Transport::Framed(conn.clone()));
    session.set_writer(Arc::new(LengthPrefixCodec));
    configure(&session, &listener);
    session.run().await.expect("run failed");

    conn.push(b"one");
    conn.push(b"two");

    assert!(wait_until(PATIENCE, || listener.message_count() == 2).await);
    assert_eq!(listener.messages(), vec![
        Incoming::Frame(Bytes::from_static(b"one")),
        Incoming::Frame(Bytes::from_static(b"two")),
    ]);

    session.write_pkg(Bytes::from_static(b"x"), Duration::ZERO).await.expect("write failed");
    assert!(wait_until(PATIENCE, || conn.written().len() == 1).await);
    assert_eq!(conn.written(), vec![Bytes::from(LengthPrefixCodec::encode(b"x"))]);

    conn.hang_up();
    assert!(closed(&session).await);
    assert!(listener.errors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn raw_frames_bypass_the_length_limit() {
    let conn = ScriptedFramed::new();
    let listener = RecordingListener::new();
    let session = Session::new(EndpointRole::Server, Transport::Framed(conn.clone()));
    session.set_writer(Arc::new(LengthPrefixCodec));
    session.set_max_msg_len(8);
    configure(&session, &listener);
    session.run().await.expect("run failed");

    let frame = Bytes::from(vec![7u8; 20]);
    conn.push(&frame);

    assert!(wait_until(PATIENCE, || listener.message_count() == 1).await);
    assert_eq!(listener.messages(), vec![Incoming::Frame(frame)]);
    assert!(listener.errors().is_empty());
    assert_eq!(session.state(), SessionState::Running);

    session.close();
    assert!(closed(&session).await);
}

#[tokio::test(start_paused = true)]
async fn oversized_frame_ends_a_decoding_framed_session() {
    let conn = ScriptedFramed::new();
    let listener = RecordingListener::new();
    let session = Session::new(EndpointRole::Server, Transport::Framed(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    session.set_max_msg_len(8);
    configure(&session, &listener);
    session.run().await.expect("run failed");

    conn.push(&LengthPrefixCodec::encode(&[0u8; 20]));

    assert!(closed(&session).await);
    assert_eq!(listener.errors(), vec![SessionError::MsgTooLong { len: 24, max: 8 }]);
    assert_eq!(listener.message_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_is_reported_once() {
    let conn = ScriptedStream::new();
    let (session, listener) = stream_session(&conn, EndpointRole::Server);
    session.run().await.expect("run failed");

    conn.fail(TransportError::Io("connection reset".to_string()));

    assert!(closed(&session).await);
    assert_eq!(
        listener.errors(),
        vec![SessionError::Transport(TransportError::Io("connection reset".to_string()))]
    );
    assert_eq!(listener.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_close_tears_down_once() {
    let conn = ScriptedStream::new();
    let (session, listener) = stream_session(&conn, EndpointRole::Server);
    session.set_attribute("user", 42u32);
    session.run().await.expect("run failed");

    let closers: Vec<_> = (0..16)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.close() })
        })
        .collect();
    for closer in closers {
        closer.await.expect("close task panicked");
    }

    assert!(closed(&session).await);
    assert!(session.is_closed());
    assert!(conn.is_closed());
    assert_eq!(listener.closes(), 1);
    assert!(listener.errors().is_empty());

    session.close();
    session.set_attribute("user", 7u32);
    assert_eq!(session.get_attribute::<_, u32>(&"user"), None);
    assert_eq!(session.write_pkg(Bytes::from_static(b"late"), Duration::ZERO).await, Err(SessionError::Closed));
    assert_eq!(session.write_bytes(b"late").await, Err(SessionError::Closed));
    assert_eq!(listener.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_open_tears_down_without_dispatching() {
    let conn = ScriptedStream::new();
    let listener = RecordingListener::rejecting();
    let session = Session::new(EndpointRole::Server, Transport::Stream(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    configure(&session, &listener);

    let result = session.run().await;

    assert!(matches!(result, Err(SessionError::Rejected(_))));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(conn.is_closed());
    assert_eq!(listener.opens(), 1);
    assert_eq!(listener.closes(), 0);
}

/// Panics on every message; counts closes.
#[derive(Default)]
struct PanickingListener {
    closes: AtomicUsize,
}

#[async_trait]
impl EventListener<Bytes> for PanickingListener {
    #[allow(clippy::panic)]
    async fn on_message(&self, _session: &Session<Bytes>, _msg: Incoming<Bytes>) {
        panic!("listener bug");
    }

    async fn on_close(&self, _session: &Session<Bytes>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn listener_panic_is_contained() {
    let conn = ScriptedStream::new();
    let listener = Arc::new(PanickingListener::default());
    let session = Session::new(EndpointRole::Server, Transport::Stream(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    session.set_event_listener(listener.clone());
    session.set_rq_len(8);
    session.set_wq_len(8);
    session.run().await.expect("run failed");

    conn.push(&LengthPrefixCodec::encode(b"boom"));

    assert!(closed(&session).await);
    assert_eq!(listener.closes.load(Ordering::SeqCst), 1);
    assert!(conn.is_closed());
}

#[tokio::test(start_paused = true)]
async fn last_active_moves_with_traffic() {
    let conn = ScriptedStream::new();
    let (session, listener) = stream_session(&conn, EndpointRole::Server);
    session.run().await.expect("run failed");
    let opened = session.last_active();

    tokio::time::sleep(Duration::from_secs(3)).await;
    conn.push(&LengthPrefixCodec::encode(b"tick"));
    assert!(wait_until(PATIENCE, || listener.message_count() == 1).await);

    assert!(session.last_active() >= opened + Duration::from_secs(3));
}

#[test]
fn default_settings_keep_the_per_kind_name() {
    let stream: Session<Bytes> =
        Session::new(EndpointRole::Server, Transport::Stream(ScriptedStream::new()));
    let datagram: Session<Bytes> =
        Session::new(EndpointRole::Server, Transport::Datagram(ScriptedDatagram::new(None)));
    let framed: Session<Bytes> = Session::new(EndpointRole::Server, Transport::Framed(ScriptedFramed::new()));

    let defaults = SessionConfig::default();
    for session in [&stream, &datagram, &framed] {
        defaults.apply(session).expect("defaults apply");
    }
    assert_eq!(stream.name(), "tcp-session");
    assert_eq!(datagram.name(), "udp-session");
    assert_eq!(framed.name(), "framed-session");

    let named = SessionConfig { name: Some("billing".to_owned()), ..SessionConfig::default() };
    named.apply(&stream).expect("named apply");
    assert_eq!(stream.name(), "billing");
}
