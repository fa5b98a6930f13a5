//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Playback state machine.
//!
//! One controller serves both session modes. In replay mode a timer calls
//! [`PlaybackController::tick`] with the [`TickToken`] it was started under;
//! any `pause`, `reset`, `seek` or new `play` retires that token, so a tick that was
//! already in flight is discarded instead of moving the cursor. In live mode
//! the timer is not used and the cursor follows the newest sample.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::debug;

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlaybackMode {
    Replay,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Allowed replay speed factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub enum PlaybackSpeed {
    Half,
    #[default]
    Normal,
    Double,
    Ten,
}

impl PlaybackSpeed {
    pub const ALL: [PlaybackSpeed; 4] = [
        PlaybackSpeed::Half,
        PlaybackSpeed::Normal,
        PlaybackSpeed::Double,
        PlaybackSpeed::Ten,
    ];

    pub fn from_factor(factor: f64) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|speed| (speed.factor() - factor).abs() < 1e-9)
            .ok_or(EngineError::InvalidSpeed(factor))
    }

    pub fn factor(self) -> f64 {
        match self {
            PlaybackSpeed::Half => 0.5,
            PlaybackSpeed::Normal => 1.0,
            PlaybackSpeed::Double => 2.0,
            PlaybackSpeed::Ten => 10.0,
        }
    }

    /// `1000 / factor` milliseconds between cursor steps.
    pub fn tick_interval(self) -> Duration {
        match self {
            PlaybackSpeed::Half => Duration::from_millis(2_000),
            PlaybackSpeed::Normal => Duration::from_millis(1_000),
            PlaybackSpeed::Double => Duration::from_millis(500),
            PlaybackSpeed::Ten => Duration::from_millis(100),
        }
    }
}

impl From<PlaybackSpeed> for f64 {
    fn from(speed: PlaybackSpeed) -> Self {
        speed.factor()
    }
}

impl TryFrom<f64> for PlaybackSpeed {
    type Error = EngineError;

    fn try_from(factor: f64) -> Result<Self> {
        Self::from_factor(factor)
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

/// Identifies the play session a scheduled tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Cursor moved to the contained index.
    Advanced(usize),
    /// Cursor was already on the last sample; playback paused itself there.
    EndOfSequence(usize),
    /// Token was retired by an earlier pause/reset/seek/play; nothing changed.
    Stale,
}

#[derive(Debug, Clone)]
pub struct PlaybackController {
    mode: PlaybackMode,
    state: PlaybackState,
    cursor: Option<usize>,
    speed: PlaybackSpeed,
    generation: u64,
}

impl PlaybackController {
    pub fn new(mode: PlaybackMode, speed: PlaybackSpeed) -> Self {
        Self {
            mode,
            state: PlaybackState::Stopped,
            cursor: None,
            speed,
            generation: 0,
        }
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn speed(&self) -> PlaybackSpeed {
        self.speed
    }

    /// `STOPPED|PAUSED -> PLAYING`. Calling it while already playing keeps the
    /// running token.
    pub fn play(&mut self, len: usize) -> Result<TickToken> {
        self.require_replay("play")?;
        if len == 0 {
            return Err(EngineError::NoData);
        }
        if self.state == PlaybackState::Playing {
            return Ok(self.token());
        }
        let last = len - 1;
        self.cursor = Some(self.cursor.map_or(0, |cursor| cursor.min(last)));
        self.state = PlaybackState::Playing;
        self.retire_token();
        debug!(cursor = ?self.cursor, speed = %self.speed, "playback started");
        Ok(self.token())
    }

    /// `PLAYING -> PAUSED`; a no-op in any other state.
    pub fn pause(&mut self) -> Result<()> {
        self.require_replay("pause")?;
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
            self.retire_token();
            debug!(cursor = ?self.cursor, "playback paused");
        }
        Ok(())
    }

    /// Any state `-> STOPPED`, cursor back to 0 (or none for an empty store).
    pub fn reset(&mut self, len: usize) -> Result<()> {
        self.require_replay("reset")?;
        self.state = PlaybackState::Stopped;
        self.cursor = (len > 0).then_some(0);
        self.retire_token();
        debug!(cursor = ?self.cursor, "playback reset");
        Ok(())
    }

    /// Move the cursor to `index` without changing the state. While playing
    /// the running token is retired and a fresh one returned, so a tick that
    /// was scheduled from the old position cannot advance the new one.
    pub fn seek(&mut self, index: usize, len: usize) -> Result<Option<TickToken>> {
        self.require_replay("seek")?;
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        self.cursor = Some(index);
        debug!(cursor = index, state = %self.state, "playback seek");
        if self.state != PlaybackState::Playing {
            return Ok(None);
        }
        self.retire_token();
        Ok(Some(self.token()))
    }

    /// Change speed without touching the cursor. An invalid factor leaves the
    /// previous speed in place.
    pub fn set_speed(&mut self, factor: f64) -> Result<PlaybackSpeed> {
        self.require_replay("set_speed")?;
        let speed = PlaybackSpeed::from_factor(factor)?;
        self.speed = speed;
        debug!(speed = %speed, "playback speed changed");
        Ok(speed)
    }

    /// Delay before the next tick of `token`, or `None` once the token is retired.
    pub fn next_delay(&self, token: TickToken) -> Option<Duration> {
        self.is_current(token).then(|| self.speed.tick_interval())
    }

    pub fn is_current(&self, token: TickToken) -> bool {
        self.mode == PlaybackMode::Replay
            && self.state == PlaybackState::Playing
            && token == self.token()
    }

    /// Advance the cursor by one for a scheduled tick.
    pub fn tick(&mut self, token: TickToken, len: usize) -> TickOutcome {
        if !self.is_current(token) {
            return TickOutcome::Stale;
        }
        let cursor = self.cursor.unwrap_or(0);
        if cursor + 1 < len {
            self.cursor = Some(cursor + 1);
            TickOutcome::Advanced(cursor + 1)
        } else {
            self.state = PlaybackState::Paused;
            self.retire_token();
            debug!(cursor, "end of sequence reached; playback paused");
            TickOutcome::EndOfSequence(cursor)
        }
    }

    /// Pin the cursor to the newest sample after a live append.
    pub fn follow_tail(&mut self, len: usize) -> Option<usize> {
        if self.mode != PlaybackMode::Live || len == 0 {
            return self.cursor;
        }
        self.state = PlaybackState::Playing;
        self.cursor = Some(len - 1);
        self.cursor
    }

    fn token(&self) -> TickToken {
        TickToken(self.generation)
    }

    fn retire_token(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn require_replay(&self, operation: &'static str) -> Result<()> {
        match self.mode {
            PlaybackMode::Replay => Ok(()),
            PlaybackMode::Live => Err(EngineError::UnsupportedInLiveMode { operation }),
        }
    }
}
