//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_window_size() -> usize {
    60
}

fn default_staleness_threshold() -> Duration {
    Duration::from_millis(10_000)
}

fn default_staleness_poll_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_speed() -> f64 {
    1.0
}

fn default_overview_points() -> usize {
    500
}

fn default_feed_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_feed_url() -> String {
    "http://127.0.0.1:8080/stream".to_owned()
}

fn default_emit_interval() -> Duration {
    Duration::from_millis(1_000)
}

fn default_reconnect_initial() -> Duration {
    Duration::from_millis(500)
}

fn default_reconnect_max() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_capacity() -> usize {
    256
}

fn default_export_directory() -> PathBuf {
    PathBuf::from("target/exports")
}

fn default_delimiter() -> char {
    ','
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_file_output() -> bool {
    true
}

/// Primary configuration object for the R-MDASH runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
///
/// `source` is `None` when no candidate existed and built-in defaults were used.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "R_MDASH_CONFIG";

    /// Load configuration from disk, respecting the `R_MDASH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `R_MDASH_CONFIG` path must exist; the candidate list is
    /// best-effort and falls back to defaults.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!("no configuration file found; using defaults");
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.feed.validate()?;
        self.export.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Analytics and playback tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_staleness_threshold", rename = "staleness_threshold_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub staleness_threshold: Duration,
    #[serde(
        default = "default_staleness_poll_interval",
        rename = "staleness_poll_interval_ms"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub staleness_poll_interval: Duration,
    /// Initial replay speed factor; checked against the allowed set by the engine.
    #[serde(default = "default_speed")]
    pub default_speed: f64,
    #[serde(default = "default_overview_points")]
    pub overview_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            staleness_threshold: default_staleness_threshold(),
            staleness_poll_interval: default_staleness_poll_interval(),
            default_speed: default_speed(),
            overview_points: default_overview_points(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(anyhow!("engine.window_size must be at least 1"));
        }
        if self.overview_points == 0 {
            return Err(anyhow!("engine.overview_points must be at least 1"));
        }
        // The allowed factor set is owned by the engine's playback speeds.
        if !(self.default_speed.is_finite() && self.default_speed > 0.0) {
            return Err(anyhow!(
                "engine.default_speed must be a positive factor, got {}",
                self.default_speed
            ));
        }
        if self.staleness_poll_interval.is_zero() {
            return Err(anyhow!("engine.staleness_poll_interval_ms must be positive"));
        }
        if self.staleness_threshold < self.staleness_poll_interval {
            return Err(anyhow!(
                "engine.staleness_threshold_ms ({} ms) is shorter than the poll interval ({} ms)",
                self.staleness_threshold.as_millis(),
                self.staleness_poll_interval.as_millis()
            ));
        }
        Ok(())
    }
}

/// Live feed transport settings, shared by the SSE server and client.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_emit_interval", rename = "emit_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub emit_interval: Duration,
    #[serde(default = "default_reconnect_initial", rename = "reconnect_initial_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_initial: Duration,
    #[serde(default = "default_reconnect_max", rename = "reconnect_max_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_max: Duration,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            listen: default_feed_listen(),
            url: default_feed_url(),
            emit_interval: default_emit_interval(),
            reconnect_initial: default_reconnect_initial(),
            reconnect_max: default_reconnect_max(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.emit_interval.is_zero() {
            return Err(anyhow!("feed.emit_interval_ms must be positive"));
        }
        if self.reconnect_initial.is_zero() || self.reconnect_initial > self.reconnect_max {
            return Err(anyhow!(
                "feed.reconnect_initial_ms must be positive and not exceed feed.reconnect_max_ms"
            ));
        }
        if self.channel_capacity == 0 {
            return Err(anyhow!("feed.channel_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_directory(),
            delimiter: default_delimiter(),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() || self.delimiter == '"' || self.delimiter == '\n' {
            return Err(anyhow!(
                "export.delimiter {:?} must be a single ASCII character other than a quote or newline",
                self.delimiter
            ));
        }
        Ok(())
    }

    /// Delimiter as the byte expected by CSV writers. Only valid after [`Self::validate`].
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_file_output")]
    pub file_output: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_output: default_file_output(),
            file_prefix: None,
        }
    }
}
