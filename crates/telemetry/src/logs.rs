use async_trait::async_trait;
use std::{sync::Arc, time::Duration, time::SystemTime};

use crate::{
    batch::{BatchPipeline, BatchSink, PipelineStats},
    config::BatchConfig,
    error::ExportError,
    export::Exporter,
    value::Attributes,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// One emitted log line. Ownership moves into the log pipeline's buffer on
/// emission.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: SystemTime,
    pub severity: Severity,
    pub body: String,
    pub attributes: Attributes,
}

pub(crate) struct LogSink(pub(crate) Arc<dyn Exporter>);

#[async_trait]
impl BatchSink<LogRecord> for LogSink {
    async fn export(&self, batch: Vec<LogRecord>) -> Result<(), ExportError> {
        self.0.export_logs(batch).await
    }
}

/// Handle for emitting log records into one service's log pipeline.
///
/// Structurally the same pipeline as spans: bounded buffer, batch-or-time
/// flush, drain on shutdown. Ambient `tracing` events are mirrored in
/// through the bridge layer without call sites changing.
#[derive(Clone)]
pub struct Logger {
    pipeline: Option<Arc<BatchPipeline<LogRecord>>>,
}

impl Logger {
    pub(crate) fn start_pipeline(config: &BatchConfig, exporter: Arc<dyn Exporter>) -> Self {
        let pipeline = BatchPipeline::start("log", config, Arc::new(LogSink(exporter)));
        Self {
            pipeline: Some(Arc::new(pipeline)),
        }
    }

    /// Inert logger for No-Op Mode.
    pub fn noop() -> Self {
        Self { pipeline: None }
    }

    pub fn is_noop(&self) -> bool {
        self.pipeline.is_none()
    }

    pub fn log(&self, severity: Severity, body: impl Into<String>, attributes: Attributes) {
        self.emit(LogRecord {
            timestamp: SystemTime::now(),
            severity,
            body: body.into(),
            attributes,
        });
    }

    pub fn emit(&self, record: LogRecord) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.emit(record);
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.as_ref().map(|p| p.stats()).unwrap_or_default()
    }

    pub(crate) async fn drain(&self, deadline: Duration) {
        if let Some(pipeline) = &self.pipeline {
            pipeline.drain(deadline).await;
        }
    }
}
