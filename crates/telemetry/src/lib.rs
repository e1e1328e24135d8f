//! # Lumen Telemetry
//!
//! This crate bootstraps distributed tracing, metrics, and log export for a
//! set of independent services sharing one backend collector.
//!
//! ## Overview
//!
//! The telemetry system provides:
//! - **Span Pipeline**: bounded buffering and batch/time-window export of
//!   finished spans
//! - **Metric Pipeline**: counters, gauges, and histograms aggregated per
//!   attribute set and collected on a fixed interval
//! - **Log Pipeline**: the same batching pipeline for log records, plus a
//!   bridge mirroring ambient `tracing` events
//! - **Provider Registry**: one set of pipelines per service name, wired
//!   exactly once no matter how many threads race to initialize
//! - **No-Op Mode**: a process-wide switch replacing everything with inert
//!   stand-ins
//!
//! The wire protocol is out of scope: exports go through the opaque
//! [`Exporter`] trait, and pipeline failures never surface into the request
//! paths that produced the telemetry.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use lumen_telemetry::{InMemoryExporter, TelemetryConfig, TelemetryRegistry, with_span};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TelemetryConfig::from_env();
//!     let registry = TelemetryRegistry::new(config, Arc::new(InMemoryExporter::new()));
//!
//!     // Once per service, typically at startup.
//!     let bundle = registry.get_or_create("cart", "1.0.0").await?;
//!
//!     // During request handling.
//!     let hits = bundle.meter.counter("cart_hits", "cart requests", "1")?;
//!     let result: Result<(), String> = with_span("add_item", &bundle.tracer, || async {
//!         hits.add(1, &[("route", "/cart")]);
//!         Ok(())
//!     })
//!     .await;
//!     result?;
//!
//!     // Flush everything before exit.
//!     registry.shutdown(Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

mod batch;
mod bridge;
mod config;
mod error;
mod export;
mod global;
mod logs;
mod metrics;
mod registry;
mod resource;
mod spans;
mod value;

pub use batch::PipelineStats;
pub use bridge::LogBridgeLayer;
pub use config::{
    BatchConfig, DEFAULT_ENVIRONMENT, DISABLED_ENV_VAR, MetricsConfig, TelemetryConfig, Temporality,
};
pub use error::{ExportError, TelemetryError};
pub use export::{Exporter, ExporterFactory, InMemoryExporter, NoopExporter};
pub use global::{DEFAULT_SHUTDOWN_DEADLINE, ShutdownGuard, init_registry, registry, shutdown};
pub use logs::{LogRecord, Logger, Severity};
pub use metrics::{
    AttributeSet, Counter, Gauge, Histogram, InstrumentKind, Meter, MetricData, MetricPoint,
    MetricValue, MetricsSnapshot,
};
pub use registry::{Lifecycle, PipelineBundle, TelemetryRegistry};
pub use resource::Resource;
pub use spans::{ActiveSpan, SpanContext, SpanRecord, SpanStatus, Tracer, with_span};
pub use value::{Attributes, Value};
