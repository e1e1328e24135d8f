use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    error::{ExportError, TelemetryError},
    logs::LogRecord,
    metrics::MetricsSnapshot,
    resource::Resource,
    spans::SpanRecord,
};

/// Opaque sink on the collector side of the pipelines.
///
/// Implementations own the wire protocol and the network connection; the
/// pipelines only hand over finished batches and snapshots. Export calls are
/// invoked solely from pipeline background tasks, never from request threads,
/// and are bounded by a per-export timeout enforced by the caller.
#[async_trait]
pub trait Exporter: Send + Sync + 'static {
    async fn export_spans(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError>;

    async fn export_metrics(&self, snapshot: MetricsSnapshot) -> Result<(), ExportError>;

    async fn export_logs(&self, batch: Vec<LogRecord>) -> Result<(), ExportError>;
}

/// Connects an exporter for one service's resource.
///
/// Called once per service during registry construction. A connection
/// failure downgrades that service to No-Op Mode; it is never surfaced to
/// the request path that triggered initialization.
pub trait ExporterFactory: Send + Sync + 'static {
    fn connect(&self, resource: &Resource) -> Result<Arc<dyn Exporter>, TelemetryError>;
}

/// Exporter that accepts and discards everything. Used by No-Op Mode.
#[derive(Debug, Default)]
pub struct NoopExporter;

#[async_trait]
impl Exporter for NoopExporter {
    async fn export_spans(&self, _: Vec<SpanRecord>) -> Result<(), ExportError> {
        Ok(())
    }

    async fn export_metrics(&self, _: MetricsSnapshot) -> Result<(), ExportError> {
        Ok(())
    }

    async fn export_logs(&self, _: Vec<LogRecord>) -> Result<(), ExportError> {
        Ok(())
    }
}

/// In-memory exporter for tests and local development.
///
/// Records every exported batch in arrival order. Data is not persisted and
/// should not be used in production environments.
#[derive(Debug, Default)]
pub struct InMemoryExporter {
    spans: Mutex<Vec<Vec<SpanRecord>>>,
    metrics: Mutex<Vec<MetricsSnapshot>>,
    logs: Mutex<Vec<Vec<LogRecord>>>,
    closed: AtomicBool,
}

impl InMemoryExporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every subsequent export call fail with [`ExportError::Shutdown`],
    /// for exercising the pipelines' failure handling.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn check_open(&self) -> Result<(), ExportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExportError::Shutdown);
        }
        Ok(())
    }

    /// Exported span batches, FIFO across batches.
    pub fn span_batches(&self) -> Vec<Vec<SpanRecord>> {
        self.spans.lock().clone()
    }

    /// All exported spans flattened across batches.
    pub fn spans(&self) -> Vec<SpanRecord> {
        self.spans.lock().iter().flatten().cloned().collect()
    }

    pub fn metric_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.metrics.lock().clone()
    }

    pub fn log_batches(&self) -> Vec<Vec<LogRecord>> {
        self.logs.lock().clone()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.logs.lock().iter().flatten().cloned().collect()
    }

    /// Total number of export calls observed across all three signals.
    pub fn export_calls(&self) -> usize {
        self.spans.lock().len() + self.metrics.lock().len() + self.logs.lock().len()
    }
}

#[async_trait]
impl Exporter for InMemoryExporter {
    async fn export_spans(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError> {
        self.check_open()?;
        self.spans.lock().push(batch);
        Ok(())
    }

    async fn export_metrics(&self, snapshot: MetricsSnapshot) -> Result<(), ExportError> {
        self.check_open()?;
        self.metrics.lock().push(snapshot);
        Ok(())
    }

    async fn export_logs(&self, batch: Vec<LogRecord>) -> Result<(), ExportError> {
        self.check_open()?;
        self.logs.lock().push(batch);
        Ok(())
    }
}

impl ExporterFactory for Arc<InMemoryExporter> {
    fn connect(&self, _: &Resource) -> Result<Arc<dyn Exporter>, TelemetryError> {
        Ok(self.clone())
    }
}
