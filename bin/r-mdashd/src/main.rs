//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the R-MDASH daemon."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use r_mdash_common::config::AppConfig;
use r_mdash_common::logging::{init_tracing, ConsoleStream};
use r_mdash_engine::{
    export_to_path, load_jsonl, EngineSession, EngineSettings, EngineSnapshot, PlaybackState,
    PointBudget, SampleField, TelemetryEngine,
};
use r_mdash_feed::{SseClient, SseServerBuilder};
use tokio::signal;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("R-MDASH ", env!("CARGO_PKG_VERSION")),
    about = "Machine telemetry replay and analytics",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Replay a JSONL capture and log snapshots until it ends")]
    Replay {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "Playback speed factor: 0.5, 1, 2 or 10")]
        speed: Option<f64>,
        #[arg(long, help = "KPI window size in samples")]
        window: Option<usize>,
    },
    #[command(about = "Tail a live SSE feed")]
    Live {
        #[arg(long, help = "Feed URL, defaults to feed.url")]
        url: Option<String>,
    },
    #[command(about = "Serve a JSONL capture as an SSE feed")]
    Serve {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "Listen address, defaults to feed.listen")]
        listen: Option<SocketAddr>,
    },
    #[command(about = "Export the KPI window ending at a cursor as CSV")]
    Export {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        cursor: usize,
        #[arg(long)]
        window: Option<usize>,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    #[command(about = "Print the decimated chart data of one field as JSON")]
    Inspect {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "Sample field, e.g. kw or temp_c")]
        field: SampleField,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        end: Option<usize>,
        #[arg(long, help = "Point budget, defaults to engine.overview_points")]
        points: Option<usize>,
        #[arg(long, conflicts_with = "points", help = "Keep every sample")]
        unbounded: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-mdash.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let console = match cli.command {
        Commands::Export { .. } | Commands::Inspect { .. } => ConsoleStream::Stderr,
        _ => ConsoleStream::Stdout,
    };
    init_tracing("r-mdashd", &config.logging, console)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    match cli.command {
        Commands::Replay {
            file,
            speed,
            window,
        } => run_replay(&config, &file, speed, window).await,
        Commands::Live { url } => run_live(&config, url).await,
        Commands::Serve { file, listen } => run_serve(&config, &file, listen).await,
        Commands::Export {
            file,
            cursor,
            window,
            out,
        } => run_export(&config, &file, cursor, window, out),
        Commands::Inspect {
            file,
            field,
            start,
            end,
            points,
            unbounded,
        } => {
            let budget = if unbounded {
                PointBudget::Unbounded
            } else {
                PointBudget::Max(points.unwrap_or(config.engine.overview_points))
            };
            run_inspect(&config, &file, field, start, end, budget)
        }
    }
}

fn settings(config: &AppConfig, window: Option<usize>) -> Result<EngineSettings> {
    let mut settings = EngineSettings::from_config(&config.engine)?;
    if let Some(window) = window {
        settings.window_size = window;
    }
    Ok(settings)
}

fn replay_engine(config: &AppConfig, file: &Path, window: Option<usize>) -> Result<TelemetryEngine> {
    let report = load_jsonl(file)
        .with_context(|| format!("unable to read telemetry from {}", file.display()))?;
    if report.skipped > 0 {
        warn!(skipped = report.skipped, "malformed lines were skipped");
    }
    let mut engine = TelemetryEngine::replay(settings(config, window)?, Instant::now())?;
    engine.load_replay(report.samples)?;
    Ok(engine)
}

async fn run_replay(
    config: &AppConfig,
    file: &Path,
    speed: Option<f64>,
    window: Option<usize>,
) -> Result<()> {
    let mut engine = replay_engine(config, file, window)?;
    if let Some(speed) = speed {
        engine.set_speed(speed)?;
    }
    let session = EngineSession::start(engine, config.engine.staleness_poll_interval)?;
    let mut updates = session.subscribe();
    session.play()?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                log_snapshot(&snapshot);
                if snapshot.state == PlaybackState::Paused {
                    info!("replay finished");
                    break;
                }
            }
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; stopping replay");
                break;
            }
        }
    }
    session.shutdown().await;
    Ok(())
}

async fn run_live(config: &AppConfig, url: Option<String>) -> Result<()> {
    let mut feed = config.feed.clone();
    if let Some(url) = url {
        feed.url = url;
    }
    let engine = TelemetryEngine::live(EngineSettings::from_config(&config.engine)?, Instant::now())?;
    let session = EngineSession::start(engine, config.engine.staleness_poll_interval)?;
    let mut updates = session.subscribe();
    let client = SseClient::from_config(&feed);
    info!(url = client.url(), "tailing live feed");
    let (mut samples, client_handle) = client.spawn(feed.channel_capacity);

    let mut alerting = false;
    loop {
        tokio::select! {
            sample = samples.recv() => {
                let Some(sample) = sample else { break };
                if let Err(err) = session.append_live(sample) {
                    warn!(error = %err, "rejected live sample");
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.staleness_alert != alerting {
                    alerting = snapshot.staleness_alert;
                    if alerting {
                        warn!(cursor = ?snapshot.cursor, "live feed is stale");
                    } else {
                        info!(cursor = ?snapshot.cursor, "live feed resumed");
                    }
                }
                log_snapshot(&snapshot);
            }
            _ = signal::ctrl_c() => {
                info!("ctrl-c received; shutting down");
                break;
            }
        }
    }
    client_handle.shutdown().await?;
    session.shutdown().await;
    Ok(())
}

async fn run_serve(config: &AppConfig, file: &Path, listen: Option<SocketAddr>) -> Result<()> {
    let listen = listen.unwrap_or(config.feed.listen);
    let server = SseServerBuilder::from_file(listen, file, config.feed.emit_interval)
        .with_context(|| format!("unable to load feed capture {}", file.display()))?
        .spawn()
        .await?;
    info!(url = %server.stream_url(), "serving telemetry; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    server.shutdown().await
}

fn run_export(
    config: &AppConfig,
    file: &Path,
    cursor: usize,
    window: Option<usize>,
    out: Option<PathBuf>,
) -> Result<()> {
    let engine = replay_engine(config, file, window)?;
    let samples = engine.window_at(cursor)?;
    let out = out.unwrap_or_else(|| {
        let machine = engine.store().machine_id().unwrap_or("machine");
        config
            .export
            .directory
            .join(format!("{machine}-window-{cursor}.csv"))
    });
    let rows = export_to_path(samples, &out, config.export.delimiter_byte())?;
    println!("Exported {rows} samples to {}", out.display());
    Ok(())
}

fn run_inspect(
    config: &AppConfig,
    file: &Path,
    field: SampleField,
    start: Option<usize>,
    end: Option<usize>,
    budget: PointBudget,
) -> Result<()> {
    let engine = replay_engine(config, file, None)?;
    let len = engine.store().len();
    let range = start.unwrap_or(0)..end.unwrap_or(len);
    let visualization = engine.prepare_visualization(range, budget, field)?;
    info!(
        field = %field,
        unit = field.unit(),
        stride = visualization.stride,
        points = visualization.points.len(),
        "visualization prepared"
    );
    println!("{}", serde_json::to_string_pretty(&visualization)?);
    Ok(())
}

fn log_snapshot(snapshot: &EngineSnapshot) {
    let kw = snapshot.sample.as_ref().map(|sample| sample.kw);
    let kpis = snapshot.kpis.as_ref();
    info!(
        cursor = ?snapshot.cursor,
        progress_percent = snapshot.progress_percent,
        state = %snapshot.state,
        speed = %snapshot.speed,
        kw = ?kw,
        avg_power = ?kpis.map(|kpis| kpis.avg_power),
        uptime = ?kpis.map(|kpis| kpis.uptime_percent),
        throughput = ?kpis.map(|kpis| kpis.throughput),
        stale = snapshot.staleness_alert,
        "snapshot"
    );
}
