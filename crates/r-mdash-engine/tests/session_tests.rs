//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use r_mdash_engine::{
    EngineError, EngineSession, EngineSettings, HealthStatus, MachineState, PlaybackState,
    Sample, TelemetryEngine,
};
use tokio::time::{sleep, Instant};

const POLL: Duration = Duration::from_millis(1_000);

fn reading(index: usize, kw: f64) -> Sample {
    Sample {
        ts: 1_714_550_400_000 + index as i64 * 1_000,
        machine_id: "press-07".into(),
        state: MachineState::Run,
        mode: "AUTO".into(),
        status: HealthStatus::Ok,
        vr: 231.0,
        vy: 230.0,
        vb: 229.0,
        ir: 10.0,
        iy: 10.0,
        ib: 10.0,
        kw,
        kwh_total: 500.0 + index as f64 * 0.1,
        pf: 0.93,
        count_total: index as u64,
        temp_c: 42.0,
        alarm_code: None,
    }
}

fn readings(len: usize) -> Vec<Sample> {
    (0..len).map(|i| reading(i, i as f64)).collect()
}

fn replay_session(len: usize) -> EngineSession {
    let engine = TelemetryEngine::replay(EngineSettings::default(), Instant::now()).unwrap();
    let session = EngineSession::start(engine, POLL).unwrap();
    session.load_replay(readings(len)).unwrap();
    session
}

#[tokio::test(start_paused = true)]
async fn replay_advances_once_per_second_and_pauses_at_end() {
    let session = replay_session(5);
    session.play().unwrap();

    sleep(Duration::from_millis(2_500)).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.cursor, Some(2));
    assert_eq!(snapshot.state, PlaybackState::Playing);

    sleep(Duration::from_millis(3_500)).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.cursor, Some(4));
    assert_eq!(snapshot.state, PlaybackState::Paused);
    assert_eq!(snapshot.progress_percent, 100.0);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pause_stops_cursor_until_resumed() {
    let session = replay_session(20);
    session.play().unwrap();
    sleep(Duration::from_millis(2_500)).await;
    session.pause().unwrap();
    assert!(!session.is_timer_running());

    sleep(Duration::from_millis(5_000)).await;
    assert_eq!(session.snapshot().cursor, Some(2));
    assert_eq!(session.snapshot().state, PlaybackState::Paused);

    session.play().unwrap();
    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(session.snapshot().cursor, Some(3));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn speed_change_applies_to_following_ticks() {
    let session = replay_session(20);
    session.play().unwrap();
    sleep(Duration::from_millis(500)).await;
    session.set_speed(10.0).unwrap();

    sleep(Duration::from_millis(850)).await;
    assert_eq!(session.snapshot().cursor, Some(4));

    assert!(matches!(session.set_speed(4.0), Err(EngineError::InvalidSpeed(_))));
    assert_eq!(session.snapshot().speed.factor(), 10.0);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_rewinds_and_discards_running_timer() {
    let session = replay_session(10);
    session.play().unwrap();
    sleep(Duration::from_millis(3_500)).await;
    session.reset().unwrap();

    sleep(Duration::from_millis(3_000)).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.cursor, Some(0));
    assert_eq!(snapshot.state, PlaybackState::Stopped);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn seek_while_playing_restarts_timer_from_new_position() {
    let session = replay_session(20);
    session.play().unwrap();
    sleep(Duration::from_millis(2_500)).await;
    session.seek(10).unwrap();
    assert_eq!(session.snapshot().cursor, Some(10));

    sleep(Duration::from_millis(700)).await;
    assert_eq!(session.snapshot().cursor, Some(10));
    sleep(Duration::from_millis(500)).await;
    assert_eq!(session.snapshot().cursor, Some(11));
    assert_eq!(session.snapshot().state, PlaybackState::Playing);

    session.pause().unwrap();
    session.seek(3).unwrap();
    sleep(Duration::from_millis(2_000)).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.cursor, Some(3));
    assert_eq!(snapshot.state, PlaybackState::Paused);
    assert!(!session.is_timer_running());

    assert!(matches!(
        session.seek(20),
        Err(EngineError::IndexOutOfRange { index: 20, len: 20 })
    ));
    assert_eq!(session.snapshot().cursor, Some(3));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn repeated_play_keeps_single_timer() {
    let session = replay_session(30);
    session.play().unwrap();
    sleep(Duration::from_millis(300)).await;
    session.play().unwrap();
    session.play().unwrap();
    sleep(Duration::from_millis(2_900)).await;
    assert_eq!(session.snapshot().cursor, Some(3));
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn live_staleness_raises_and_clears() {
    let engine = TelemetryEngine::live(EngineSettings::default(), Instant::now()).unwrap();
    let session = EngineSession::start(engine, POLL).unwrap();
    let mut updates = session.subscribe();

    session.append_live(reading(0, 5.0)).unwrap();
    sleep(Duration::from_millis(11_500)).await;
    assert!(session.snapshot().staleness_alert);

    session.append_live(reading(1, 6.0)).unwrap();
    assert!(!session.snapshot().staleness_alert);
    assert!(updates.has_changed().unwrap());
    let latest = updates.borrow_and_update().clone();
    assert_eq!(latest.cursor, Some(1));
    assert_eq!(latest.sample.map(|sample| sample.kw), Some(6.0));

    sleep(Duration::from_millis(1_000)).await;
    assert!(!session.snapshot().staleness_alert);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stopped_replay_never_reports_staleness() {
    let session = replay_session(3);
    sleep(Duration::from_secs(30)).await;
    assert!(!session.snapshot().staleness_alert);
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn live_session_rejects_transport_controls() {
    let engine = TelemetryEngine::live(EngineSettings::default(), Instant::now()).unwrap();
    let session = EngineSession::start(engine, POLL).unwrap();
    assert!(matches!(
        session.play(),
        Err(EngineError::UnsupportedInLiveMode { operation: "play" })
    ));
    assert!(session.load_replay(readings(3)).is_err());
    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_snapshot_channel() {
    let session = replay_session(10);
    let mut updates = session.subscribe();
    session.play().unwrap();
    sleep(Duration::from_millis(1_500)).await;
    updates.borrow_and_update();

    session.shutdown().await;
    sleep(Duration::from_millis(5_000)).await;
    assert!(updates.changed().await.is_err());
    assert_eq!(updates.borrow().cursor, Some(1));
}

#[tokio::test(start_paused = true)]
async fn current_window_is_exported_from_cursor() {
    let session = replay_session(8);
    session.play().unwrap();
    sleep(Duration::from_millis(3_200)).await;
    let window = session.current_window().unwrap();
    assert_eq!(window.len(), 4);
    assert_eq!(window.last().map(|sample| sample.kw), Some(3.0));
    session.shutdown().await;
}
