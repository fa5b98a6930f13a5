//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Telemetry replay and analytics engine.
//!
//! [`TelemetryEngine`] binds a [`SequenceStore`] to playback, windowed KPIs,
//! staleness detection and chart decimation. [`EngineSession`] drives it from
//! tokio timers and publishes [`EngineSnapshot`]s to subscribers.

pub mod aggregator;
pub mod engine;
pub mod errors;
pub mod export;
pub mod io;
pub mod playback;
pub mod sample;
pub mod session;
pub mod staleness;
pub mod store;
pub mod visual;

pub use aggregator::{KpiSnapshot, WindowAggregator};
pub use engine::{EngineSettings, EngineSnapshot, TelemetryEngine};
pub use errors::{EngineError, Result};
pub use export::{export_csv, export_to_path};
pub use io::{load_jsonl, read_jsonl, LoadReport};
pub use playback::{PlaybackController, PlaybackMode, PlaybackSpeed, PlaybackState, TickOutcome, TickToken};
pub use sample::{HealthStatus, MachineState, Sample, SampleField, TemperatureBand};
pub use session::EngineSession;
pub use staleness::StalenessDetector;
pub use store::SequenceStore;
pub use visual::{
    DecimatedPoint, PlotPoint, PointBudget, ValueDomain, Viewport, Visualization,
    VisualizationPreparer,
};
