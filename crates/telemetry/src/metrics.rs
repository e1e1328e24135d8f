use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::{MetricsConfig, Temporality},
    error::TelemetryError,
    export::Exporter,
};

/// Instrument kinds the data model is polymorphic over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    Gauge,
    Histogram,
}

impl InstrumentKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

/// Normalized attribute key for one aggregation stream: sorted by key so the
/// same attributes always land on the same point regardless of call order.
pub type AttributeSet = Vec<(String, String)>;

fn attribute_set(attributes: &[(&str, &str)]) -> AttributeSet {
    let mut set: AttributeSet = attributes
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PointState {
    Counter(u64),
    Gauge(u64),
    Histogram { count: u64, sum: f64 },
}

/// Aggregated value of one attribute stream at collection time.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(u64),
    Histogram { count: u64, sum: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub attributes: AttributeSet,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricData {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub kind: InstrumentKind,
    pub points: Vec<MetricPoint>,
}

/// One collection cycle's aggregated values for a single service.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Instrumentation scope, `"{service}-{version}"`.
    pub scope: String,
    pub temporality: Temporality,
    pub instruments: Vec<MetricData>,
}

struct InstrumentState {
    name: String,
    description: String,
    unit: String,
    kind: InstrumentKind,
    // Per-instrument lock: concurrent adds on unrelated instruments never
    // contend with each other, only with this instrument's collection.
    points: Mutex<HashMap<AttributeSet, PointState>>,
}

impl InstrumentState {
    fn collect(&self, temporality: Temporality) -> Vec<MetricPoint> {
        let mut points = self.points.lock();
        let snapshot: Vec<MetricPoint> = points
            .iter()
            .map(|(attributes, state)| MetricPoint {
                attributes: attributes.clone(),
                value: match *state {
                    PointState::Counter(v) => MetricValue::Counter(v),
                    PointState::Gauge(v) => MetricValue::Gauge(v),
                    PointState::Histogram { count, sum } => MetricValue::Histogram { count, sum },
                },
            })
            .collect();
        // Delta temporality advances the window by resetting accumulations.
        // Gauges keep their last observed value in either mode.
        if temporality == Temporality::Delta && self.kind != InstrumentKind::Gauge {
            points.clear();
        }
        snapshot
    }
}

/// Monotonically increasing sum instrument.
#[derive(Clone)]
pub struct Counter {
    state: Option<Arc<InstrumentState>>,
}

impl Counter {
    /// Adds `delta` to the aggregation stream identified by `attributes`.
    /// Thread-safe; contends only on this instrument's state.
    pub fn add(&self, delta: u64, attributes: &[(&str, &str)]) {
        if let Some(state) = &self.state {
            let mut points = state.points.lock();
            let entry = points
                .entry(attribute_set(attributes))
                .or_insert(PointState::Counter(0));
            if let PointState::Counter(value) = entry {
                *value += delta;
            }
        }
    }
}

/// Last-value instrument.
#[derive(Clone)]
pub struct Gauge {
    state: Option<Arc<InstrumentState>>,
}

impl Gauge {
    pub fn set(&self, value: u64, attributes: &[(&str, &str)]) {
        if let Some(state) = &self.state {
            state
                .points
                .lock()
                .insert(attribute_set(attributes), PointState::Gauge(value));
        }
    }
}

/// Count-and-sum distribution instrument.
#[derive(Clone)]
pub struct Histogram {
    state: Option<Arc<InstrumentState>>,
}

impl Histogram {
    pub fn record(&self, value: f64, attributes: &[(&str, &str)]) {
        if let Some(state) = &self.state {
            let mut points = state.points.lock();
            let entry = points
                .entry(attribute_set(attributes))
                .or_insert(PointState::Histogram { count: 0, sum: 0.0 });
            if let PointState::Histogram { count, sum } = entry {
                *count += 1;
                *sum += value;
            }
        }
    }
}

struct MeterCore {
    scope: String,
    temporality: Temporality,
    export_timeout: Duration,
    exporter: Arc<dyn Exporter>,
    instruments: RwLock<HashMap<String, Arc<InstrumentState>>>,
    // Serializes collection cycles (periodic tick, forced, final).
    collect_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle for registering instruments against one service's metric pipeline.
///
/// Cheap to clone; all clones share instrument state and the periodic
/// collection task. A noop meter hands out inert instruments.
#[derive(Clone)]
pub struct Meter {
    inner: Option<Arc<MeterCore>>,
}

impl Meter {
    pub(crate) fn start_pipeline(
        scope: String,
        config: &MetricsConfig,
        exporter: Arc<dyn Exporter>,
    ) -> Self {
        let core = Arc::new(MeterCore {
            scope,
            temporality: config.temporality,
            export_timeout: config.export_timeout(),
            exporter,
            instruments: RwLock::new(HashMap::new()),
            collect_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        });
        let worker = Self::run_collection_loop(core.clone(), config.interval());
        *core.worker.lock() = Some(worker);
        Self { inner: Some(core) }
    }

    /// Inert meter for No-Op Mode.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    /// Registers a counter, or returns the existing one registered under
    /// `name`. Re-registration under a different kind is a programming
    /// error and fails with [`TelemetryError::InstrumentConflict`].
    pub fn counter(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Result<Counter, TelemetryError> {
        let state = self.register(name.into(), description.into(), unit.into(), InstrumentKind::Counter)?;
        Ok(Counter { state })
    }

    pub fn gauge(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Result<Gauge, TelemetryError> {
        let state = self.register(name.into(), description.into(), unit.into(), InstrumentKind::Gauge)?;
        Ok(Gauge { state })
    }

    pub fn histogram(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
    ) -> Result<Histogram, TelemetryError> {
        let state =
            self.register(name.into(), description.into(), unit.into(), InstrumentKind::Histogram)?;
        Ok(Histogram { state })
    }

    fn register(
        &self,
        name: String,
        description: String,
        unit: String,
        kind: InstrumentKind,
    ) -> Result<Option<Arc<InstrumentState>>, TelemetryError> {
        let Some(core) = &self.inner else {
            return Ok(None);
        };
        let mut instruments = core.instruments.write();
        if let Some(existing) = instruments.get(&name) {
            if existing.kind == kind {
                return Ok(Some(existing.clone()));
            }
            return Err(TelemetryError::InstrumentConflict {
                name,
                existing: existing.kind.as_str(),
                requested: kind.as_str(),
            });
        }
        let state = Arc::new(InstrumentState {
            name: name.clone(),
            description,
            unit,
            kind,
            points: Mutex::new(HashMap::new()),
        });
        instruments.insert(name, state.clone());
        Ok(Some(state))
    }

    /// Forces an immediate collection and export cycle, outside the fixed
    /// interval. Used by the shutdown orchestrator so the last partial
    /// window is not lost.
    pub async fn collect(&self) {
        if let Some(core) = &self.inner {
            collect_cycle(core).await;
        }
    }

    /// Cancels the periodic collection task after one final cycle, waiting
    /// up to `deadline` for it to finish. Safe to call more than once.
    pub(crate) async fn shutdown(&self, deadline: Duration) {
        let Some(core) = &self.inner else {
            return;
        };
        core.cancel.cancel();
        let worker = core.worker.lock().take();
        if let Some(mut worker) = worker {
            if timeout(deadline, &mut worker).await.is_err() {
                warn!("metric pipeline shutdown exceeded {:?}", deadline);
                worker.abort();
            }
        }
    }

    fn run_collection_loop(core: Arc<MeterCore>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Consume the immediate first tick; the first real collection
            // happens one full interval after startup.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = core.cancel.cancelled() => {
                        debug!("metric collection loop cancelled");
                        break;
                    }
                    _ = tick.tick() => {
                        collect_cycle(&core).await;
                    }
                }
            }
            // Final cycle so the last partial window still ships.
            collect_cycle(&core).await;
        })
    }
}

/// Snapshots every instrument, advances the aggregation window per the
/// configured temporality, and exports the result. An export failure or
/// timeout logs and discards this cycle's snapshot; the next tick starts
/// from a fresh window.
async fn collect_cycle(core: &MeterCore) {
    let _guard = core.collect_lock.lock().await;
    let instruments: Vec<Arc<InstrumentState>> = {
        let map = core.instruments.read();
        let mut all: Vec<_> = map.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    };
    let data: Vec<MetricData> = instruments
        .iter()
        .filter_map(|instrument| {
            let points = instrument.collect(core.temporality);
            if points.is_empty() {
                return None;
            }
            Some(MetricData {
                name: instrument.name.clone(),
                description: instrument.description.clone(),
                unit: instrument.unit.clone(),
                kind: instrument.kind,
                points,
            })
        })
        .collect();
    if data.is_empty() {
        return;
    }
    let snapshot = MetricsSnapshot {
        scope: core.scope.clone(),
        temporality: core.temporality,
        instruments: data,
    };
    match timeout(core.export_timeout, core.exporter.export_metrics(snapshot)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("metric export failed, discarding snapshot: {}", e),
        Err(_) => warn!(
            "metric export timed out after {:?}, discarding snapshot",
            core.export_timeout
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::InMemoryExporter;

    fn test_meter(temporality: Temporality, exporter: Arc<InMemoryExporter>) -> Meter {
        let config = MetricsConfig {
            interval_ms: 60_000,
            export_timeout_ms: 1_000,
            temporality,
        };
        Meter::start_pipeline("cart-1.0.0".to_string(), &config, exporter)
    }

    fn counter_value(snapshot: &MetricsSnapshot, name: &str) -> u64 {
        let data = snapshot
            .instruments
            .iter()
            .find(|i| i.name == name)
            .expect("instrument missing from snapshot");
        match data.points[0].value {
            MetricValue::Counter(v) => v,
            _ => panic!("expected counter point"),
        }
    }

    #[tokio::test]
    async fn test_counter_aggregates_within_window() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Cumulative, exporter.clone());

        let hits = meter.counter("cart_hits", "cart requests", "1").unwrap();
        for _ in 0..5 {
            hits.add(1, &[]);
        }
        meter.collect().await;

        let snapshots = exporter.metric_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(counter_value(&snapshots[0], "cart_hits"), 5);
        assert_eq!(snapshots[0].scope, "cart-1.0.0");

        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_delta_temporality_resets_window() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Delta, exporter.clone());

        let hits = meter.counter("hits", "", "1").unwrap();
        hits.add(5, &[]);
        meter.collect().await;
        hits.add(3, &[]);
        meter.collect().await;

        let snapshots = exporter.metric_snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(counter_value(&snapshots[0], "hits"), 5);
        assert_eq!(counter_value(&snapshots[1], "hits"), 3);

        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_cumulative_temporality_keeps_totals() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Cumulative, exporter.clone());

        let hits = meter.counter("hits", "", "1").unwrap();
        hits.add(5, &[]);
        meter.collect().await;
        hits.add(3, &[]);
        meter.collect().await;

        let snapshots = exporter.metric_snapshots();
        assert_eq!(counter_value(&snapshots[0], "hits"), 5);
        assert_eq!(counter_value(&snapshots[1], "hits"), 8);

        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_same_name_returns_same_instrument() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Cumulative, exporter.clone());

        let a = meter.counter("orders", "orders placed", "1").unwrap();
        let b = meter.counter("orders", "orders placed", "1").unwrap();
        a.add(2, &[]);
        b.add(3, &[]);
        meter.collect().await;

        assert_eq!(counter_value(&exporter.metric_snapshots()[0], "orders"), 5);
        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_kind_conflict_is_an_error() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Cumulative, exporter.clone());

        meter.counter("latency", "", "ms").unwrap();
        let err = meter.histogram("latency", "", "ms").err().unwrap();
        assert!(matches!(
            err,
            TelemetryError::InstrumentConflict {
                existing: "counter",
                requested: "histogram",
                ..
            }
        ));

        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_attribute_streams_aggregate_separately() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Cumulative, exporter.clone());

        let hits = meter.counter("hits", "", "1").unwrap();
        hits.add(1, &[("route", "/cart"), ("method", "GET")]);
        hits.add(1, &[("method", "GET"), ("route", "/cart")]);
        hits.add(1, &[("route", "/order")]);
        meter.collect().await;

        let snapshot = &exporter.metric_snapshots()[0];
        let data = &snapshot.instruments[0];
        assert_eq!(data.points.len(), 2);
        let cart = data
            .points
            .iter()
            .find(|p| p.attributes.iter().any(|(_, v)| v == "/cart"))
            .unwrap();
        assert_eq!(cart.value, MetricValue::Counter(2));

        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_runs_final_collection() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Cumulative, exporter.clone());

        let hits = meter.counter("hits", "", "1").unwrap();
        hits.add(7, &[]);
        meter.shutdown(Duration::from_secs(1)).await;

        let snapshots = exporter.metric_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(counter_value(&snapshots[0], "hits"), 7);
    }

    #[tokio::test]
    async fn test_gauge_and_histogram_points() {
        let exporter = InMemoryExporter::new();
        let meter = test_meter(Temporality::Delta, exporter.clone());

        let depth = meter.gauge("queue_depth", "", "1").unwrap();
        depth.set(4, &[]);
        depth.set(9, &[]);
        let latency = meter.histogram("latency", "", "ms").unwrap();
        latency.record(10.0, &[]);
        latency.record(30.0, &[]);
        meter.collect().await;
        meter.collect().await;

        let snapshots = exporter.metric_snapshots();
        let gauge = snapshots[0]
            .instruments
            .iter()
            .find(|i| i.name == "queue_depth")
            .unwrap();
        assert_eq!(gauge.points[0].value, MetricValue::Gauge(9));
        let histogram = snapshots[0]
            .instruments
            .iter()
            .find(|i| i.name == "latency")
            .unwrap();
        assert_eq!(
            histogram.points[0].value,
            MetricValue::Histogram { count: 2, sum: 40.0 }
        );
        // Delta reset the histogram but the gauge keeps its last value.
        let second = &snapshots[1];
        assert!(second.instruments.iter().all(|i| i.name != "latency"));
        assert!(second.instruments.iter().any(|i| i.name == "queue_depth"));

        meter.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_noop_meter_is_inert() {
        let meter = Meter::noop();
        let hits = meter.counter("hits", "", "1").unwrap();
        for _ in 0..1_000 {
            hits.add(1, &[]);
        }
        meter.collect().await;
        assert!(meter.is_noop());
    }
}
