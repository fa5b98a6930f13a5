//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the R-MDASH workspace.
//! This crate exposes configuration loading and logging setup consumed by
//! the engine, the feed transport and the daemon binary.

pub mod config;
pub mod logging;

pub use config::{AppConfig, EngineConfig, ExportConfig, FeedConfig, LoadedAppConfig, LoggingConfig};
pub use logging::{init_tracing, ConsoleStream, LogFormat};
