//! ---
//! ems_section: "11-telemetry-replay-analytics"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Replay, analytics and chart preparation for machine telemetry."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot load an empty sample sequence")]
    EmptySequence,
    #[error("sample at {rejected_ts} ms precedes last stored sample at {previous_ts} ms")]
    OutOfOrder { previous_ts: i64, rejected_ts: i64 },
    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("no samples available")]
    NoData,
    #[error("unsupported playback speed {0}; allowed factors are 0.5, 1, 2 and 10")]
    InvalidSpeed(f64),
    #[error("{operation} is not supported in live mode")]
    UnsupportedInLiveMode { operation: &'static str },
    #[error("replay sequences are immutable; append is only valid in live mode")]
    ImmutableReplayStore,
    #[error("sample belongs to machine {found}, sequence belongs to {expected}")]
    MachineMismatch { expected: String, found: String },
    #[error("invalid sample field {field}: {reason}")]
    InvalidSample { field: &'static str, reason: String },
    #[error("empty range {start}..{end}")]
    EmptyRange { start: usize, end: usize },
    #[error("window size must be at least one sample")]
    InvalidWindow,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
