//! Mirrors the process's ambient `tracing` events into log pipelines.
//!
//! The bridge is one process-wide [`Layer`] fanning events out to every
//! registered service logger. It augments whatever subscriber stack is
//! already in place: when this crate installs it, a plain fmt layer is kept
//! alongside so stdout logging continues unchanged. Installation happens at
//! most once per process; registering a service twice replaces its sink
//! rather than duplicating records.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Once, time::SystemTime};
use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    logs::{LogRecord, Logger},
    value::{Attributes, Value},
};

lazy_static! {
    static ref SINKS: RwLock<HashMap<String, Logger>> = RwLock::new(HashMap::new());
}

static INSTALL: Once = Once::new();

/// Adds (or replaces) the log pipeline mirroring ambient events for one
/// service, and installs the bridge on first use.
pub(crate) fn register_sink(service_name: &str, logger: Logger) {
    SINKS.write().insert(service_name.to_string(), logger);
    install();
}

/// Detaches a service's sink; emitted after its pipeline has drained.
pub(crate) fn unregister_sink(service_name: &str) {
    SINKS.write().remove(service_name);
}

fn install() {
    INSTALL.call_once(|| {
        let installed = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(LogBridgeLayer)
            .try_init()
            .is_ok();
        if !installed {
            // A subscriber was already set by the host. Its destinations are
            // untouched; ambient mirroring requires the host to compose
            // [`LogBridgeLayer`] into its own stack.
            tracing::info!(
                "a global tracing subscriber is already installed; \
                 add LogBridgeLayer to it to mirror ambient logs"
            );
        }
    });
}

/// `tracing_subscriber` layer forwarding events to all registered service
/// log pipelines. Exposed so hosts that build their own subscriber stack
/// can compose it explicitly instead of relying on automatic installation.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBridgeLayer;

impl<S: Subscriber> Layer<S> for LogBridgeLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // The pipelines report their own failures through tracing; feeding
        // those back in would buffer diagnostics about the buffer itself.
        if metadata.target().starts_with("lumen_telemetry") {
            return;
        }
        let sinks = SINKS.read();
        if sinks.is_empty() {
            return;
        }
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let mut attributes = visitor.attributes;
        attributes.push((
            "log.target".to_string(),
            Value::String(metadata.target().to_string()),
        ));
        let record = LogRecord {
            timestamp: SystemTime::now(),
            severity: (*metadata.level()).into(),
            body: visitor.body,
            attributes,
        };
        for logger in sinks.values() {
            logger.emit(record.clone());
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    body: String,
    attributes: Attributes,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.body = value.to_string();
        } else {
            self.attributes
                .push((field.name().to_string(), Value::String(value.to_string())));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.attributes.push((field.name().to_string(), Value::I64(value)));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.attributes
            .push((field.name().to_string(), Value::I64(value as i64)));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.attributes.push((field.name().to_string(), Value::F64(value)));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.attributes.push((field.name().to_string(), Value::Bool(value)));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.body = format!("{value:?}");
        } else {
            self.attributes
                .push((field.name().to_string(), Value::String(format!("{value:?}"))));
        }
    }
}
