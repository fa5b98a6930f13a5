//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "R_MDASH_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

static GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Where console logs go. Commands that print their result on stdout
/// (`inspect`, `export`) log to stderr so the output stays machine readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStream {
    #[default]
    Stdout,
    Stderr,
}

impl ConsoleStream {
    fn writer(self) -> (NonBlocking, WorkerGuard) {
        match self {
            ConsoleStream::Stdout => tracing_appender::non_blocking(std::io::stdout()),
            ConsoleStream::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        }
    }
}

/// Filter for an explicit `R_MDASH_LOG` directive, falling back to `RUST_LOG`
/// and then to `info`. An unparsable directive is reported and ignored.
fn env_filter(directive: Option<String>) -> EnvFilter {
    match directive {
        Some(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {LOG_ENV} directive {directive:?} ({err}); defaulting to {DEFAULT_DIRECTIVE}"
            );
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}

/// Install the global subscriber: the configured format on `console`, plus a
/// daily rolling JSON file under `config.directory` when `config.file_output`
/// is set. Later calls are ignored.
pub fn init_tracing(
    service_name: &str,
    config: &LoggingConfig,
    console: ConsoleStream,
) -> Result<()> {
    let mut guards = Vec::with_capacity(2);
    let (console_writer, console_guard) = console.writer();
    guards.push(console_guard);

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };

    let file_layer = if config.file_output {
        std::fs::create_dir_all(&config.directory)?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
        guards.push(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer)
                .boxed(),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(std::env::var(LOG_ENV).ok()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        let _ = GUARDS.set(guards);
        info!(
            service = %service_name,
            format = ?config.format,
            console = ?console,
            file_output = config.file_output,
            log_dir = %config.directory.display(),
            "tracing initialised"
        );
    }
    Ok(())
}
