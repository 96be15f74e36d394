//! Heartbeat timing on a paused clock.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use skein_core::{EndpointRole, Session, SessionState, Transport};
use skein_harness::{LengthPrefixCodec, RecordingListener, ScriptedFramed, ScriptedStream, wait_until};

const PERIOD: Duration = Duration::from_secs(1);

fn assert_spaced(ticks: &[tokio::time::Instant], period: Duration) {
    for pair in ticks.windows(2) {
        assert!(pair[1] - pair[0] >= period, "cron ran twice within one period: {pair:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn cron_runs_at_most_once_per_period() {
    let conn = ScriptedStream::new();
    let listener = RecordingListener::<Bytes>::new();
    let session = Session::new(EndpointRole::Server, Transport::Stream(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    session.set_event_listener(listener.clone());
    session.set_rq_len(4);
    session.set_wq_len(4);
    session.set_cron_period(PERIOD);
    session.run().await.expect("run failed");

    tokio::time::sleep(Duration::from_millis(5500)).await;

    let ticks = listener.crons();
    assert!((4..=5).contains(&ticks.len()), "unexpected cron count {}", ticks.len());
    assert_spaced(&ticks, PERIOD);

    session.close();
    assert!(wait_until(Duration::from_secs(30), || session.state() == SessionState::Closed).await);
    let after_close = listener.crons().len();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(listener.crons().len(), after_close);
}

#[tokio::test(start_paused = true)]
async fn cron_period_change_applies_to_the_next_tick() {
    let conn = ScriptedStream::new();
    let listener = RecordingListener::<Bytes>::new();
    let session = Session::new(EndpointRole::Server, Transport::Stream(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    session.set_event_listener(listener.clone());
    session.set_rq_len(4);
    session.set_wq_len(4);
    session.set_cron_period(PERIOD);
    session.run().await.expect("run failed");

    assert!(wait_until(Duration::from_secs(5), || listener.crons().len() == 1).await);
    session.set_cron_period(Duration::from_secs(4));

    tokio::time::sleep(Duration::from_secs(10)).await;
    let ticks = listener.crons();
    assert!(ticks.len() >= 3);
    assert_spaced(&ticks[1..], Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn framed_session_pings_once_per_cron() {
    let conn = ScriptedFramed::new();
    let listener = RecordingListener::<Bytes>::new();
    let session = Session::new(EndpointRole::Client, Transport::Framed(conn.clone()));
    session.set_writer(Arc::new(LengthPrefixCodec));
    session.set_event_listener(listener.clone());
    session.set_rq_len(4);
    session.set_wq_len(4);
    session.set_cron_period(PERIOD);
    session.run().await.expect("run failed");

    tokio::time::sleep(Duration::from_millis(3500)).await;

    let crons = listener.crons().len();
    assert!(crons >= 3);
    assert_eq!(conn.pings(), crons);

    session.close();
}

#[tokio::test(start_paused = true)]
async fn stream_session_sends_no_pings() {
    let conn = ScriptedStream::new();
    let listener = RecordingListener::<Bytes>::new();
    let session = Session::new(EndpointRole::Client, Transport::Stream(conn.clone()));
    session.set_pkg_handler(Arc::new(LengthPrefixCodec));
    session.set_event_listener(listener.clone());
    session.set_rq_len(4);
    session.set_wq_len(4);
    session.set_cron_period(PERIOD);
    session.run().await.expect("run failed");

    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(!listener.crons().is_empty());
    assert!(conn.written().is_empty());
}
