use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

use crate::{config::TelemetryConfig, export::ExporterFactory, registry::TelemetryRegistry};

lazy_static! {
    static ref REGISTRY: Mutex<Option<Arc<TelemetryRegistry>>> = Mutex::new(None);
}

/// Deadline applied to each pipeline's final flush when a [`ShutdownGuard`]
/// drives shutdown without an explicit deadline.
pub const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Initializes the process-global registry slot.
///
/// Call sites that can thread a [`TelemetryRegistry`] explicitly should do
/// so; this slot exists for hosts where unrelated modules must reach the
/// same registry without wiring. A second call returns the registry that is
/// already installed.
pub fn init_registry(
    config: TelemetryConfig,
    exporters: Arc<dyn ExporterFactory>,
) -> Arc<TelemetryRegistry> {
    let mut slot = REGISTRY.lock();
    if let Some(existing) = slot.as_ref() {
        warn!("global telemetry registry already initialized");
        return existing.clone();
    }
    let registry = Arc::new(TelemetryRegistry::new(config, exporters));
    *slot = Some(registry.clone());
    info!("global telemetry registry initialized");
    registry
}

/// The globally installed registry, if [`init_registry`] has run.
pub fn registry() -> Option<Arc<TelemetryRegistry>> {
    REGISTRY.lock().clone()
}

/// Runs the shutdown orchestrator on the global registry, if installed.
pub async fn shutdown(deadline: Duration) {
    let registry = REGISTRY.lock().clone();
    if let Some(registry) = registry {
        registry.shutdown(deadline).await;
    }
}

/// Ties the shutdown orchestrator to scope exit.
///
/// Hold one in `main` and call [`ShutdownGuard::shutdown`] before the
/// runtime stops to flush all pipelines. If the guard is instead dropped,
/// shutdown is spawned best-effort on the current runtime; whatever the
/// runtime tears down first may then be lost, so the explicit call is
/// preferred.
pub struct ShutdownGuard {
    registry: Option<Arc<TelemetryRegistry>>,
    deadline: Duration,
}

impl ShutdownGuard {
    pub fn new(registry: Arc<TelemetryRegistry>) -> Self {
        Self {
            registry: Some(registry),
            deadline: DEFAULT_SHUTDOWN_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Drains every pipeline and releases the guard.
    pub async fn shutdown(mut self) {
        if let Some(registry) = self.registry.take() {
            registry.shutdown(self.deadline).await;
        }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.take() {
            let deadline = self.deadline;
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    registry.shutdown(deadline).await;
                });
            }
            // Without a runtime the pipeline tasks are already gone; there
            // is nothing left to flush.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemoryExporter;

    // Single test: the global slot is process-wide state.
    #[tokio::test]
    async fn test_global_slot_initializes_once_and_shuts_down() {
        let exporter = InMemoryExporter::new();
        assert!(registry().is_none());

        let first = init_registry(TelemetryConfig::default(), Arc::new(exporter.clone()));
        let second = init_registry(TelemetryConfig::default(), Arc::new(exporter.clone()));
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry().is_some());

        let bundle = first.get_or_create("cart", "1.0.0").await.unwrap();
        bundle.tracer.start("exit").end();

        let guard = ShutdownGuard::new(first).with_deadline(Duration::from_secs(1));
        guard.shutdown().await;
        shutdown(Duration::from_secs(1)).await;

        assert_eq!(exporter.spans().len(), 1);
    }
}
