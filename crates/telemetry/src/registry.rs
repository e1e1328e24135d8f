use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::{
    bridge,
    config::TelemetryConfig,
    error::TelemetryError,
    export::ExporterFactory,
    logs::Logger,
    metrics::Meter,
    resource::Resource,
    spans::Tracer,
};

/// Lifecycle of one service's registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Active,
    Shutdown,
}

/// The fully wired tracer, meter, and logger for one service.
///
/// Owned by the registry entry for that service name and handed out as
/// cheap clones; callers never tear the handles down themselves.
#[derive(Clone)]
pub struct PipelineBundle {
    pub tracer: Tracer,
    pub meter: Meter,
    pub logger: Logger,
}

impl PipelineBundle {
    /// Bundle whose handles record nothing and own no background tasks.
    pub fn noop() -> Self {
        Self {
            tracer: Tracer::noop(),
            meter: Meter::noop(),
            logger: Logger::noop(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.tracer.is_noop()
    }
}

struct ServiceEntry {
    cell: OnceCell<PipelineBundle>,
    lifecycle: Mutex<Lifecycle>,
}

impl ServiceEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceCell::new(),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        })
    }
}

/// Process-wide cache mapping each service identity to its pipelines.
///
/// `get_or_create` is idempotent and safe under concurrent first use: one
/// caller wires the pipelines, everyone else waits on that entry's guard and
/// receives the same bundle. Initialization of unrelated service names never
/// serializes. The registry doubles as the shutdown orchestrator via
/// [`TelemetryRegistry::shutdown`].
pub struct TelemetryRegistry {
    config: TelemetryConfig,
    exporters: Arc<dyn ExporterFactory>,
    entries: Mutex<HashMap<String, Arc<ServiceEntry>>>,
    /// Shared inert bundle when the process-wide disable switch is set.
    noop_bundle: Option<PipelineBundle>,
    shut_down: AtomicBool,
}

impl TelemetryRegistry {
    pub fn new(config: TelemetryConfig, exporters: Arc<dyn ExporterFactory>) -> Self {
        let noop_bundle = config.disabled.then(|| {
            info!("telemetry disabled by configuration, running in no-op mode");
            PipelineBundle::noop()
        });
        Self {
            config,
            exporters,
            entries: Mutex::new(HashMap::new()),
            noop_bundle,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the pipeline bundle for `service_name`, wiring and starting
    /// it on first use.
    ///
    /// Only invalid identity fields fail; an exporter that cannot be wired
    /// downgrades the service to an inert bundle instead of surfacing the
    /// failure into the caller's request path.
    pub async fn get_or_create(
        &self,
        service_name: &str,
        service_version: &str,
    ) -> Result<PipelineBundle, TelemetryError> {
        let resource = Resource::new(service_name, service_version, &self.config.environment)?;
        if let Some(bundle) = &self.noop_bundle {
            return Ok(bundle.clone());
        }
        if self.shut_down.load(Ordering::Acquire) {
            warn!(
                "telemetry registry already shut down, '{}' gets a no-op bundle",
                service_name
            );
            return Ok(PipelineBundle::noop());
        }
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .entry(service_name.to_string())
                .or_insert_with(ServiceEntry::new)
                .clone()
        };
        let bundle = entry
            .cell
            .get_or_init(|| async { self.build_bundle(resource, &entry) })
            .await;
        Ok(bundle.clone())
    }

    fn build_bundle(&self, resource: Resource, entry: &ServiceEntry) -> PipelineBundle {
        let bundle = match self.exporters.connect(&resource) {
            Ok(exporter) => {
                let tracer = Tracer::start_pipeline(&self.config.batch, exporter.clone());
                let meter =
                    Meter::start_pipeline(resource.scope(), &self.config.metrics, exporter.clone());
                let logger = Logger::start_pipeline(&self.config.batch, exporter);
                bridge::register_sink(resource.service_name(), logger.clone());
                info!(
                    "telemetry pipelines started for '{}' ({})",
                    resource.service_name(),
                    resource.environment()
                );
                PipelineBundle { tracer, meter, logger }
            }
            Err(e) => {
                error!(
                    "failed to wire exporter for '{}', downgrading to no-op: {}",
                    resource.service_name(),
                    e
                );
                PipelineBundle::noop()
            }
        };
        *entry.lifecycle.lock() = Lifecycle::Active;
        bundle
    }

    /// Current lifecycle of a service's entry, if one exists.
    pub fn lifecycle(&self, service_name: &str) -> Option<Lifecycle> {
        let entries = self.entries.lock();
        entries.get(service_name).map(|e| *e.lifecycle.lock())
    }

    /// Shutdown orchestrator: for every active entry, drains the span
    /// pipeline, forces a final metric collection, drains the log pipeline,
    /// and marks the entry shut down.
    ///
    /// Best-effort and idempotent: a second invocation is a no-op, and no
    /// failure escapes. `deadline` bounds each pipeline's final flush.
    pub async fn shutdown(&self, deadline: Duration) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries: Vec<(String, Arc<ServiceEntry>)> = {
            let entries = self.entries.lock();
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (service_name, entry) in entries {
            if let Some(bundle) = entry.cell.get() {
                bundle.tracer.drain(deadline).await;
                bundle.meter.shutdown(deadline).await;
                bundle.logger.drain(deadline).await;
                bridge::unregister_sink(&service_name);
                info!("telemetry pipelines shut down for '{}'", service_name);
            }
            *entry.lifecycle.lock() = Lifecycle::Shutdown;
        }
    }
}
