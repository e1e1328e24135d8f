use async_trait::async_trait;
use futures::FutureExt;
use std::{
    future::Future,
    panic::{AssertUnwindSafe, resume_unwind},
    sync::Arc,
    time::{Duration, SystemTime},
};

use crate::{
    batch::{BatchPipeline, BatchSink, PipelineStats},
    config::BatchConfig,
    error::ExportError,
    export::Exporter,
    value::{Attributes, Value},
};

/// Outcome of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Ok,
    Error,
}

/// Correlation id linking a span to its trace and to child spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
}

impl SpanContext {
    fn generate() -> Self {
        Self {
            trace_id: rand::random(),
            span_id: rand::random(),
        }
    }

    /// New context sharing this context's trace id.
    fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: rand::random(),
        }
    }
}

/// A finished, timed record of one unit of work.
///
/// Finalized exactly once, when its [`ActiveSpan`] closes; ownership then
/// moves into the span pipeline's buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub name: String,
    pub start: SystemTime,
    pub end: SystemTime,
    pub attributes: Attributes,
    pub status: SpanStatus,
    pub context: SpanContext,
    pub parent: Option<SpanContext>,
}

pub(crate) struct SpanSink(pub(crate) Arc<dyn Exporter>);

#[async_trait]
impl BatchSink<SpanRecord> for SpanSink {
    async fn export(&self, batch: Vec<SpanRecord>) -> Result<(), ExportError> {
        self.0.export_spans(batch).await
    }
}

/// Handle for opening spans against one service's span pipeline.
///
/// Cheap to clone; all clones share the pipeline. A noop tracer records
/// nothing and performs no background work.
#[derive(Clone)]
pub struct Tracer {
    pipeline: Option<Arc<BatchPipeline<SpanRecord>>>,
}

impl Tracer {
    pub(crate) fn start_pipeline(config: &BatchConfig, exporter: Arc<dyn Exporter>) -> Self {
        let pipeline = BatchPipeline::start("span", config, Arc::new(SpanSink(exporter)));
        Self {
            pipeline: Some(Arc::new(pipeline)),
        }
    }

    /// Inert tracer for No-Op Mode.
    pub fn noop() -> Self {
        Self { pipeline: None }
    }

    pub fn is_noop(&self) -> bool {
        self.pipeline.is_none()
    }

    /// Opens a root span. Prefer [`with_span`] at call sites; use this
    /// directly only when the span must outlive a single scope.
    pub fn start(&self, name: impl Into<String>) -> ActiveSpan {
        self.span(name.into(), None)
    }

    /// Opens a span correlated with an existing context, e.g. one recovered
    /// from an incoming request.
    pub fn start_with_parent(&self, name: impl Into<String>, parent: SpanContext) -> ActiveSpan {
        self.span(name.into(), Some(parent))
    }

    fn span(&self, name: String, parent: Option<SpanContext>) -> ActiveSpan {
        let context = parent.map_or_else(SpanContext::generate, |p| p.child());
        let record = self.pipeline.is_some().then(|| SpanRecord {
            name,
            start: SystemTime::now(),
            end: SystemTime::now(),
            attributes: Vec::new(),
            status: SpanStatus::default(),
            context,
            parent,
        });
        ActiveSpan {
            context,
            record,
            pipeline: self.pipeline.clone(),
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

/// An open span. Guaranteed to finalize on every exit path: either through
/// an explicit [`ActiveSpan::end`] or on drop. The finalized record is handed
/// to the span pipeline exactly once.
pub struct ActiveSpan {
    context: SpanContext,
    record: Option<SpanRecord>,
    pipeline: Option<Arc<BatchPipeline<SpanRecord>>>,
}

impl ActiveSpan {
    pub fn context(&self) -> SpanContext {
        self.context
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(record) = &mut self.record {
            record.attributes.push((key.into(), value.into()));
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(record) = &mut self.record {
            record.status = status;
        }
    }

    pub fn end(mut self) {
        self.finalize();
    }

    fn finalize(&mut self) {
        if let (Some(mut record), Some(pipeline)) = (self.record.take(), self.pipeline.as_ref()) {
            record.end = SystemTime::now();
            pipeline.emit(record);
        }
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Runs `body` inside a span named `name`, guaranteeing closure on every
/// exit path. This is the single documented way instrumented code enters the
/// tracing system.
///
/// The span's status mirrors the outcome: `Ok` when `body` returns `Ok`,
/// `Error` when it returns `Err` or panics. The caller's error or panic is
/// re-raised unchanged after the span is finalized.
pub async fn with_span<F, Fut, T, E>(name: &str, tracer: &Tracer, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut span = tracer.start(name);
    span.set_attribute("code.function", name);
    match AssertUnwindSafe(body()).catch_unwind().await {
        Ok(Ok(value)) => {
            span.set_status(SpanStatus::Ok);
            span.end();
            Ok(value)
        }
        Ok(Err(error)) => {
            span.set_status(SpanStatus::Error);
            span.end();
            Err(error)
        }
        Err(panic) => {
            span.set_status(SpanStatus::Error);
            span.end();
            resume_unwind(panic)
        }
    }
}
