//! Divergence report sinks.

use anyhow::{Context, Result};
use shadow_core::DivergenceReport;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives one report per compared statement.
///
/// `emit` is called on the session task and must not block.
pub trait DivergenceSink: Send + Sync {
    fn emit(&self, report: &DivergenceReport);
}

/// Logs matches at debug level and every anomaly at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DivergenceSink for TracingSink {
    fn emit(&self, report: &DivergenceReport) {
        if report.is_match() {
            debug!("{}", report.summary());
        } else {
            warn!(
                session_id = report.session_id,
                classification = report.classification.label(),
                "Divergence: {}",
                report.summary()
            );
        }
    }
}

/// Appends reports as JSON lines from a background writer task.
pub struct JsonlSink {
    tx: mpsc::UnboundedSender<String>,
}

impl JsonlSink {
    /// Open `path` for appending and start the writer task.
    ///
    /// The task ends once every clone of the sink is dropped and the queue
    /// is drained.
    pub async fn open(path: &Path) -> Result<(Self, JoinHandle<Result<()>>)> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open report file {}", path.display()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let handle = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }
            Ok(())
        });

        Ok((Self { tx }, handle))
    }
}

/// Wait for a [`JsonlSink`] writer to drain its queue after the last sink
/// clone was dropped. Fails when sessions still holding the sink keep it open
/// past `grace`.
pub async fn finish_writer(writer: JoinHandle<Result<()>>, grace: Duration) -> Result<()> {
    match tokio::time::timeout(grace, writer).await {
        Ok(joined) => joined.context("Report writer task panicked")?,
        Err(_) => anyhow::bail!(
            "Report writer still open after {} ms, queued reports may be lost",
            grace.as_millis()
        ),
    }
}

impl DivergenceSink for JsonlSink {
    fn emit(&self, report: &DivergenceReport) {
        match serde_json::to_string(report) {
            Ok(line) => {
                if self.tx.send(line).is_err() {
                    warn!("Report writer has stopped, dropping report");
                }
            }
            Err(e) => warn!("Failed to serialize report: {}", e),
        }
    }
}

/// Fans every report out to several sinks.
#[derive(Default, Clone)]
pub struct CompositeSink {
    sinks: Vec<Arc<dyn DivergenceSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn DivergenceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DivergenceSink for CompositeSink {
    fn emit(&self, report: &DivergenceReport) {
        for sink in &self.sinks {
            sink.emit(report);
        }
    }
}

/// Keeps every report in memory.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<DivergenceReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the reports received so far.
    pub fn reports(&self) -> Vec<DivergenceReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DivergenceSink for MemorySink {
    fn emit(&self, report: &DivergenceReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}
