//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live telemetry feed over server-sent events."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use futures::StreamExt;
use r_mdash_common::FeedConfig;
use r_mdash_engine::io::parse_line;
use r_mdash_engine::Sample;
use reqwest::header::ACCEPT;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::sse::SseDecoder;

/// Exponential reconnect delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

enum StreamEnd {
    Disconnected,
    ReceiverClosed,
}

/// Tails an SSE feed of JSON samples.
#[derive(Debug, Clone)]
pub struct SseClient {
    url: String,
    reconnect_initial: Duration,
    reconnect_max: Duration,
    http: reqwest::Client,
}

impl SseClient {
    pub fn new(url: impl Into<String>, reconnect_initial: Duration, reconnect_max: Duration) -> Self {
        Self {
            url: url.into(),
            reconnect_initial,
            reconnect_max,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            config.url.clone(),
            config.reconnect_initial,
            config.reconnect_max,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run in the background, delivering samples on the returned channel.
    pub fn spawn(self, capacity: usize) -> (mpsc::Receiver<Sample>, FeedClientHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(tx, shutdown_rx));
        (
            rx,
            FeedClientHandle {
                shutdown: shutdown_tx,
                task,
            },
        )
    }

    /// Connect, stream and reconnect until shutdown is signalled or the
    /// receiving side goes away.
    pub async fn run(self, tx: mpsc::Sender<Sample>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.reconnect_initial, self.reconnect_max);
        loop {
            if *shutdown.borrow() {
                break;
            }
            let outcome = tokio::select! {
                outcome = self.stream_once(&tx, &mut backoff) => outcome,
                _ = shutdown.changed() => break,
            };
            match outcome {
                Ok(StreamEnd::ReceiverClosed) => break,
                Ok(StreamEnd::Disconnected) => info!(url = %self.url, "feed closed by server"),
                Err(err) => warn!(url = %self.url, error = %err, "feed connection failed"),
            }
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting to feed");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(url = %self.url, "feed client stopped");
    }

    async fn stream_once(
        &self,
        tx: &mpsc::Sender<Sample>,
        backoff: &mut Backoff,
    ) -> Result<StreamEnd> {
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        info!(url = %self.url, "connected to feed");
        backoff.reset();

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                match parse_line(&data) {
                    Ok(Some(sample)) => {
                        if tx.send(sample).await.is_err() {
                            return Ok(StreamEnd::ReceiverClosed);
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error = %err, "discarding malformed feed event"),
                }
            }
        }
        Ok(StreamEnd::Disconnected)
    }
}

/// Handle for a spawned [`SseClient`].
pub struct FeedClientHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FeedClientHandle {
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}
