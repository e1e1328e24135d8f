use thiserror::Error;

/// Errors surfaced to callers wiring up the telemetry system.
///
/// Producer-side operations (span completion, counter adds, log emission)
/// never return these: telemetry failures after initialization are absorbed
/// locally and observable through pipeline counters instead.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid telemetry configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to initialize pipeline for '{service}': {reason}")]
    PipelineInitFailure { service: String, reason: String },
    #[error("instrument '{name}' already registered as {existing}, requested {requested}")]
    InstrumentConflict {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },
}

/// Errors an [`Exporter`](crate::export::Exporter) implementation returns
/// from a flush or collection cycle.
///
/// Always recovered locally: the batch or snapshot is discarded, a failure
/// counter is incremented, and the next cycle proceeds with a fresh window.
/// Export deadlines are enforced by the pipelines themselves, so a slow
/// exporter does not need to report its own timeouts.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("exporter is shut down")]
    Shutdown,
}
