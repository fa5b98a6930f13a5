//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live telemetry feed over server-sent events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed source {0} contains no lines")]
    NoLines(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
