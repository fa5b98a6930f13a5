//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Async driver around [`TelemetryEngine`].
//!
//! A session owns two named background tasks: the playback timer and the
//! staleness poller. Both only touch the engine through a short synchronous
//! lock, and every state change is published as a fresh [`EngineSnapshot`].

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r_mdash_rt::{RateLimiter, TaskGroup};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::{EngineSnapshot, TelemetryEngine};
use crate::errors::Result;
use crate::playback::{PlaybackSpeed, PlaybackState, TickOutcome, TickToken};
use crate::sample::{Sample, SampleField};
use crate::visual::{PointBudget, Visualization};

const PLAYBACK_TASK: &str = "playback";
const STALENESS_TASK: &str = "staleness";

#[derive(Debug)]
struct Shared {
    engine: Mutex<TelemetryEngine>,
    snapshots: watch::Sender<EngineSnapshot>,
}

impl Shared {
    fn publish(&self, engine: &TelemetryEngine) {
        match engine.snapshot() {
            Ok(snapshot) => {
                self.snapshots.send_replace(snapshot);
            }
            Err(err) => warn!(error = %err, "failed to build engine snapshot"),
        }
    }

    /// Apply one scheduled tick. Returns whether the timer should keep going.
    fn step(&self, token: TickToken) -> bool {
        let mut engine = self.engine.lock();
        match engine.tick(token, Instant::now()) {
            TickOutcome::Advanced(cursor) => {
                debug!(cursor, "playback advanced");
                self.publish(&engine);
                true
            }
            TickOutcome::EndOfSequence(cursor) => {
                info!(cursor, "replay reached end of sequence");
                self.publish(&engine);
                false
            }
            TickOutcome::Stale => false,
        }
    }

    fn poll_staleness(&self, now: Instant) {
        let mut engine = self.engine.lock();
        let before = engine.staleness_alert();
        if engine.poll_staleness(now) != before {
            self.publish(&engine);
        }
    }
}

async fn run_playback(shared: Arc<Shared>, token: TickToken) {
    loop {
        // Re-read every iteration so a speed change applies to the next tick.
        let delay = shared.engine.lock().next_delay(token);
        let Some(delay) = delay else {
            break;
        };
        tokio::time::sleep(delay).await;
        if !shared.step(token) {
            break;
        }
    }
}

async fn run_staleness(shared: Arc<Shared>, period: Duration) {
    let mut limiter = RateLimiter::new(period);
    loop {
        let now = limiter.tick().await;
        shared.poll_staleness(now);
    }
}

/// Running engine session. Must be started inside a tokio runtime.
#[derive(Debug)]
pub struct EngineSession {
    shared: Arc<Shared>,
    tasks: TaskGroup,
}

impl EngineSession {
    pub fn start(engine: TelemetryEngine, poll_interval: Duration) -> Result<Self> {
        let initial = engine.snapshot()?;
        let (snapshots, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            engine: Mutex::new(engine),
            snapshots,
        });
        let tasks = TaskGroup::new();
        tasks.spawn(STALENESS_TASK, run_staleness(shared.clone(), poll_interval));
        info!(poll_ms = poll_interval.as_millis() as u64, "engine session started");
        Ok(Self { shared, tasks })
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn load_replay(&self, samples: Vec<Sample>) -> Result<usize> {
        let mut engine = self.shared.engine.lock();
        let len = engine.load_replay(samples)?;
        self.tasks.abort(PLAYBACK_TASK);
        self.shared.publish(&engine);
        Ok(len)
    }

    pub fn append_live(&self, sample: Sample) -> Result<usize> {
        let mut engine = self.shared.engine.lock();
        let index = engine.append_live(sample, Instant::now())?;
        self.shared.publish(&engine);
        Ok(index)
    }

    /// Start or resume playback. A second call while playing is a no-op.
    pub fn play(&self) -> Result<()> {
        let token = {
            let mut engine = self.shared.engine.lock();
            let already_playing = engine.playback().state() == PlaybackState::Playing;
            let token = engine.play(Instant::now())?;
            if already_playing && self.tasks.is_running(PLAYBACK_TASK) {
                return Ok(());
            }
            self.shared.publish(&engine);
            token
        };
        self.tasks
            .spawn(PLAYBACK_TASK, run_playback(self.shared.clone(), token));
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let mut engine = self.shared.engine.lock();
        engine.pause()?;
        self.tasks.abort(PLAYBACK_TASK);
        self.shared.publish(&engine);
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        let mut engine = self.shared.engine.lock();
        engine.reset()?;
        self.tasks.abort(PLAYBACK_TASK);
        self.shared.publish(&engine);
        Ok(())
    }

    /// Jump to `index`. A running timer is restarted from the new position.
    pub fn seek(&self, index: usize) -> Result<()> {
        let token = {
            let mut engine = self.shared.engine.lock();
            let token = engine.seek(index, Instant::now())?;
            self.tasks.abort(PLAYBACK_TASK);
            self.shared.publish(&engine);
            token
        };
        if let Some(token) = token {
            self.tasks
                .spawn(PLAYBACK_TASK, run_playback(self.shared.clone(), token));
        }
        Ok(())
    }

    pub fn set_speed(&self, factor: f64) -> Result<PlaybackSpeed> {
        let mut engine = self.shared.engine.lock();
        let speed = engine.set_speed(factor)?;
        self.shared.publish(&engine);
        Ok(speed)
    }

    pub fn is_timer_running(&self) -> bool {
        self.tasks.is_running(PLAYBACK_TASK)
    }

    pub fn prepare_visualization(
        &self,
        range: Range<usize>,
        budget: PointBudget,
        field: SampleField,
    ) -> Result<Visualization> {
        self.shared
            .engine
            .lock()
            .prepare_visualization(range, budget, field)
    }

    pub fn current_window(&self) -> Result<Vec<Sample>> {
        Ok(self.shared.engine.lock().current_window()?.to_vec())
    }

    /// Cancel the playback timer and the staleness poller and wait for both.
    pub async fn shutdown(self) {
        self.tasks.shutdown().await;
        info!("engine session stopped");
    }
}
