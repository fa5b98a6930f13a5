//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::ops::Range;
use std::time::Duration;

use r_mdash_common::EngineConfig;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

use crate::aggregator::{KpiSnapshot, WindowAggregator};
use crate::errors::{EngineError, Result};
use crate::playback::{
    PlaybackController, PlaybackMode, PlaybackSpeed, PlaybackState, TickOutcome, TickToken,
};
use crate::sample::{Sample, SampleField, TemperatureBand};
use crate::staleness::StalenessDetector;
use crate::store::SequenceStore;
use crate::visual::{PointBudget, Visualization, VisualizationPreparer};

/// Validated engine tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub window_size: usize,
    pub staleness_threshold: Duration,
    pub overview_points: usize,
    pub speed: PlaybackSpeed,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window_size: WindowAggregator::DEFAULT_WINDOW,
            staleness_threshold: StalenessDetector::DEFAULT_THRESHOLD,
            overview_points: VisualizationPreparer::DEFAULT_OVERVIEW_POINTS,
            speed: PlaybackSpeed::Normal,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        if config.window_size == 0 {
            return Err(EngineError::InvalidWindow);
        }
        Ok(Self {
            window_size: config.window_size,
            staleness_threshold: config.staleness_threshold,
            overview_points: config.overview_points,
            speed: PlaybackSpeed::from_factor(config.default_speed)?,
        })
    }
}

/// Everything a dashboard needs for the current cursor position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub machine_id: Option<String>,
    pub mode: PlaybackMode,
    pub state: PlaybackState,
    pub speed: PlaybackSpeed,
    pub cursor: Option<usize>,
    pub len: usize,
    pub progress_percent: f64,
    pub sample: Option<Sample>,
    pub kpis: Option<KpiSnapshot>,
    pub staleness_alert: bool,
    pub temperature_band: Option<TemperatureBand>,
}

/// Synchronous engine facade. Owns the store and every derived component;
/// the caller supplies the clock so the engine itself never blocks or sleeps.
#[derive(Debug)]
pub struct TelemetryEngine {
    store: SequenceStore,
    playback: PlaybackController,
    aggregator: WindowAggregator,
    staleness: StalenessDetector,
    preparer: VisualizationPreparer,
}

impl TelemetryEngine {
    pub fn new(mode: PlaybackMode, settings: EngineSettings, now: Instant) -> Result<Self> {
        Ok(Self {
            store: SequenceStore::new(),
            playback: PlaybackController::new(mode, settings.speed),
            aggregator: WindowAggregator::new(settings.window_size)?,
            staleness: StalenessDetector::new(settings.staleness_threshold, now),
            preparer: VisualizationPreparer::new(PointBudget::Max(settings.overview_points)),
        })
    }

    pub fn replay(settings: EngineSettings, now: Instant) -> Result<Self> {
        Self::new(PlaybackMode::Replay, settings, now)
    }

    pub fn live(settings: EngineSettings, now: Instant) -> Result<Self> {
        Self::new(PlaybackMode::Live, settings, now)
    }

    pub fn mode(&self) -> PlaybackMode {
        self.playback.mode()
    }

    pub fn store(&self) -> &SequenceStore {
        &self.store
    }

    pub fn playback(&self) -> &PlaybackController {
        &self.playback
    }

    /// Replace the replay sequence and rewind to the first sample.
    pub fn load_replay(&mut self, samples: Vec<Sample>) -> Result<usize> {
        if self.mode() == PlaybackMode::Live {
            return Err(EngineError::UnsupportedInLiveMode {
                operation: "load_replay",
            });
        }
        self.store.load(samples)?;
        self.playback.reset(self.store.len())?;
        info!(
            machine = self.store.machine_id().unwrap_or_default(),
            samples = self.store.len(),
            "replay sequence loaded"
        );
        Ok(self.store.len())
    }

    /// Append a freshly received sample and move the cursor onto it.
    pub fn append_live(&mut self, sample: Sample, now: Instant) -> Result<usize> {
        if self.mode() == PlaybackMode::Replay {
            return Err(EngineError::ImmutableReplayStore);
        }
        let index = self.store.append(sample)?;
        self.playback.follow_tail(self.store.len());
        self.staleness.record_arrival(now);
        Ok(index)
    }

    pub fn play(&mut self, now: Instant) -> Result<TickToken> {
        let resumed = self.playback.state() != PlaybackState::Playing;
        let token = self.playback.play(self.store.len())?;
        if resumed {
            self.staleness.rearm(now);
        }
        Ok(token)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.playback.pause()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.playback.reset(self.store.len())
    }

    /// Jump to `index`. Returns the new tick token when playback is running.
    pub fn seek(&mut self, index: usize, now: Instant) -> Result<Option<TickToken>> {
        let token = self.playback.seek(index, self.store.len())?;
        if token.is_some() {
            self.staleness.record_arrival(now);
        }
        Ok(token)
    }

    pub fn set_speed(&mut self, factor: f64) -> Result<PlaybackSpeed> {
        self.playback.set_speed(factor)
    }

    pub fn next_delay(&self, token: TickToken) -> Option<Duration> {
        self.playback.next_delay(token)
    }

    pub fn tick(&mut self, token: TickToken, now: Instant) -> TickOutcome {
        let outcome = self.playback.tick(token, self.store.len());
        if let TickOutcome::Advanced(_) = outcome {
            self.staleness.record_arrival(now);
        }
        outcome
    }

    /// Staleness is only meaningful while data is expected: always in live
    /// mode, and in replay mode while playing.
    pub fn poll_staleness(&mut self, now: Instant) -> bool {
        let monitored = self.mode() == PlaybackMode::Live
            || self.playback.state() == PlaybackState::Playing;
        if monitored {
            self.staleness.poll(now)
        } else {
            self.staleness.rearm(now);
            false
        }
    }

    pub fn staleness_alert(&self) -> bool {
        self.staleness.is_alerting()
    }

    pub fn current_sample(&self) -> Option<&Sample> {
        self.playback
            .cursor()
            .and_then(|cursor| self.store.at(cursor).ok())
    }

    pub fn kpis(&self) -> Result<Option<KpiSnapshot>> {
        self.aggregator.aggregate(&self.store, self.playback.cursor())
    }

    /// Samples of the window ending at the cursor, as shown on screen.
    pub fn current_window(&self) -> Result<&[Sample]> {
        let cursor = self.playback.cursor().ok_or(EngineError::NoData)?;
        self.window_at(cursor)
    }

    pub fn window_at(&self, cursor: usize) -> Result<&[Sample]> {
        if self.store.is_empty() {
            return Err(EngineError::NoData);
        }
        self.store
            .range(self.aggregator.window_bounds(cursor, self.store.len())?)
    }

    pub fn snapshot(&self) -> Result<EngineSnapshot> {
        let cursor = self.playback.cursor();
        let len = self.store.len();
        let sample = self.current_sample().cloned();
        let progress_percent = match cursor {
            Some(cursor) if len > 0 => (cursor + 1) as f64 / len as f64 * 100.0,
            _ => 0.0,
        };
        Ok(EngineSnapshot {
            machine_id: self.store.machine_id().map(str::to_owned),
            mode: self.mode(),
            state: self.playback.state(),
            speed: self.playback.speed(),
            cursor,
            len,
            progress_percent,
            temperature_band: sample.as_ref().map(Sample::temperature_band),
            sample,
            kpis: self.kpis()?,
            staleness_alert: self.staleness.is_alerting(),
        })
    }

    pub fn prepare_visualization(
        &self,
        range: Range<usize>,
        budget: PointBudget,
        field: SampleField,
    ) -> Result<Visualization> {
        self.preparer.prepare(&self.store, range, budget, field)
    }

    /// Decimate the whole stored sequence with the overview budget.
    pub fn overview(&self, field: SampleField) -> Result<Visualization> {
        self.preparer.overview(&self.store, 0..self.store.len(), field)
    }
}
