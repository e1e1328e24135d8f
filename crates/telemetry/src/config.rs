use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable that forces No-Op Mode for the whole process.
/// Accepted truthy values: `1`, `true`, `yes` (case-insensitive).
pub const DISABLED_ENV_VAR: &str = "LUMEN_TELEMETRY_DISABLED";

/// Environment reported on resources when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "demo";

// Configuration for the span and log batching pipelines
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Bounded buffer capacity; records arriving beyond it are dropped.
    pub buffer_capacity: usize,
    /// Flush as soon as this many records are buffered.
    pub max_batch_size: usize,
    /// Flush at least this often while records are buffered, in milliseconds.
    pub max_delay_ms: u64,
    /// Deadline for a single export call, in milliseconds.
    pub export_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 2048,
            max_batch_size: 512,
            max_delay_ms: 5_000,
            export_timeout_ms: 5_000,
        }
    }
}

impl BatchConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }
}

/// Whether exported metric values are totals since pipeline start or totals
/// since the previous export.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum Temporality {
    #[default]
    Cumulative,
    Delta,
}

// Configuration for the periodic metric collection pipeline
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Fixed collection interval, in milliseconds.
    pub interval_ms: u64,
    /// Deadline for exporting one snapshot, in milliseconds.
    pub export_timeout_ms: u64,
    pub temporality: Temporality,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            export_timeout_ms: 5_000,
            temporality: Temporality::Cumulative,
        }
    }
}

impl MetricsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }
}

// Configuration for the whole telemetry system
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Forces No-Op Mode for every service registered in this process.
    pub disabled: bool,
    /// Deployment environment reported on every resource.
    pub environment: String,
    pub batch: BatchConfig,
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            batch: BatchConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Default configuration with the disable switch read from
    /// [`DISABLED_ENV_VAR`].
    pub fn from_env() -> Self {
        Self {
            disabled: disabled_from_env(),
            ..Self::default()
        }
    }
}

fn disabled_from_env() -> bool {
    match std::env::var(DISABLED_ENV_VAR) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => false,
    }
}
