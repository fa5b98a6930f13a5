//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live telemetry feed over server-sent events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream};
use r_mdash_common::FeedConfig;
use r_mdash_rt::RateLimiter;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{FeedError, Result};

const INDEX_BODY: &str = "OK. Use /stream for SSE.";

struct FeedState {
    lines: Arc<[String]>,
    emit_interval: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Builder for the SSE simulator that replays a JSONL capture as a live feed.
///
/// Every subscriber gets its own cursor starting at the first line; the
/// first line is sent immediately and the capture loops forever.
#[derive(Debug, Clone)]
pub struct SseServerBuilder {
    listen: SocketAddr,
    lines: Arc<[String]>,
    emit_interval: Duration,
}

impl SseServerBuilder {
    pub fn new(listen: SocketAddr, lines: Vec<String>, emit_interval: Duration) -> Self {
        Self {
            listen,
            lines: lines.into(),
            emit_interval,
        }
    }

    /// Read the non-blank lines of `path`.
    pub fn from_file(listen: SocketAddr, path: &Path, emit_interval: Duration) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let lines: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        if lines.is_empty() {
            return Err(FeedError::NoLines(path.to_path_buf()));
        }
        Ok(Self::new(listen, lines, emit_interval))
    }

    pub fn from_config(config: &FeedConfig, path: &Path) -> Result<Self> {
        Self::from_file(config.listen, path, config.emit_interval)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Bind and serve in the background.
    pub async fn spawn(self) -> anyhow::Result<SseServerHandle> {
        if self.lines.is_empty() {
            anyhow::bail!("sse server needs at least one line to emit");
        }
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(
            address = %local_addr,
            lines = self.lines.len(),
            interval_ms = self.emit_interval.as_millis() as u64,
            "sse feed listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(FeedState {
            lines: self.lines,
            emit_interval: self.emit_interval,
            shutdown: shutdown_rx.clone(),
        });

        let app = Router::new()
            .route("/stream", get(stream_handler))
            .route("/", get(index_handler))
            .with_state(state);

        let mut server_shutdown = shutdown_rx;
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "sse server exited with error");
            }
        });

        Ok(SseServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running SSE server.
pub struct SseServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SseServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn stream_url(&self) -> String {
        format!("http://{}/stream", self.address)
    }

    /// Close every open stream, stop accepting connections and wait.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

async fn index_handler() -> &'static str {
    INDEX_BODY
}

async fn stream_handler(State(state): State<Arc<FeedState>>) -> impl IntoResponse {
    debug!("sse subscriber connected");
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Sse::new(emit_lines(state)),
    )
}

fn emit_lines(state: Arc<FeedState>) -> impl Stream<Item = std::result::Result<Event, Infallible>> {
    let limiter = RateLimiter::new(state.emit_interval);
    let shutdown = state.shutdown.clone();
    stream::unfold(
        (state, limiter, shutdown, 0usize),
        |(state, mut limiter, mut shutdown, index)| async move {
            if *shutdown.borrow() {
                return None;
            }
            tokio::select! {
                _ = limiter.tick() => {}
                _ = shutdown.changed() => return None,
            }
            let event = Event::default().data(state.lines[index].as_str());
            let next = (index + 1) % state.lines.len();
            Some((Ok(event), (state, limiter, shutdown, next)))
        },
    )
}
