//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Integration and validation tests for the R-MDASH stack."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use r_mdash_engine::{EngineSession, EngineSettings, PlaybackMode, TelemetryEngine};
use r_mdash_feed::{SseClient, SseServerBuilder};
use tokio::time::{sleep, timeout, Instant};

#[tokio::test]
async fn served_capture_feeds_live_session() -> anyhow::Result<()> {
    let capture = Path::new(env!("CARGO_MANIFEST_DIR")).join("../data/press-07-sample.jsonl");
    let server = SseServerBuilder::from_file(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        &capture,
        Duration::from_millis(20),
    )?
    .spawn()
    .await?;

    let settings = EngineSettings {
        staleness_threshold: Duration::from_millis(300),
        ..EngineSettings::default()
    };
    let engine = TelemetryEngine::live(settings, Instant::now())?;
    let session = EngineSession::start(engine, Duration::from_millis(50))?;

    let client = SseClient::new(
        server.stream_url(),
        Duration::from_millis(20),
        Duration::from_millis(200),
    );
    let (mut samples, client_handle) = client.spawn(1);

    for _ in 0..5 {
        let sample = timeout(Duration::from_secs(5), samples.recv())
            .await?
            .expect("feed ended early");
        session.append_live(sample)?;
    }
    let snapshot = session.snapshot();
    assert_eq!(snapshot.mode, PlaybackMode::Live);
    assert_eq!(snapshot.cursor, Some(4));
    assert_eq!(snapshot.machine_id.as_deref(), Some("press-07"));
    assert!(!snapshot.staleness_alert);

    // Stop consuming; the engine sees no arrivals from here on.
    sleep(Duration::from_millis(600)).await;
    assert!(session.snapshot().staleness_alert);

    client_handle.shutdown().await?;
    server.shutdown().await?;
    session.shutdown().await;
    Ok(())
}
