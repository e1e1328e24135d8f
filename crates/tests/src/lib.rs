#![cfg(test)]

use anyhow::Result;
use lumen_telemetry::{
    BatchConfig, InMemoryExporter, SpanStatus, TelemetryConfig, TelemetryRegistry, with_span,
};
use std::{sync::Arc, time::Duration};

fn fast_config() -> TelemetryConfig {
    // Time triggers pushed out so tests observe only size triggers and
    // explicit drains.
    TelemetryConfig {
        batch: BatchConfig {
            buffer_capacity: 256,
            max_batch_size: 64,
            max_delay_ms: 60_000,
            export_timeout_ms: 1_000,
        },
        ..TelemetryConfig::default()
    }
}

fn registry_with(config: TelemetryConfig) -> (TelemetryRegistry, Arc<InMemoryExporter>) {
    let exporter = InMemoryExporter::new();
    let registry = TelemetryRegistry::new(config, Arc::new(exporter.clone()));
    (registry, exporter)
}

#[tokio::test]
async fn test_full_round_trip_through_one_service() -> Result<()> {
    let (registry, exporter) = registry_with(fast_config());
    let bundle = registry.get_or_create("cart", "1.0.0").await?;

    let hits = bundle.meter.counter("cart_hits", "cart requests", "1")?;
    let added: Result<(), String> = with_span("add_item", &bundle.tracer, || async {
        hits.add(1, &[("route", "/cart")]);
        Ok(())
    })
    .await;
    assert!(added.is_ok());
    bundle.logger.log(
        lumen_telemetry::Severity::Info,
        "item added",
        Vec::new(),
    );

    registry.shutdown(Duration::from_secs(1)).await;

    let spans = exporter.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "add_item");
    assert_eq!(spans[0].status, SpanStatus::Ok);

    let snapshots = exporter.metric_snapshots();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].scope, "cart-1.0.0");

    let logs = exporter.logs();
    assert!(logs.iter().any(|r| r.body == "item added"));
    Ok(())
}

#[tokio::test]
async fn test_two_services_export_independently() -> Result<()> {
    let (registry, exporter) = registry_with(fast_config());
    let cart = registry.get_or_create("cart", "1.0.0").await?;
    let order = registry.get_or_create("order", "2.0.0").await?;

    cart.tracer.start("cart_op").end();
    order.tracer.start("order_op").end();
    order.meter.counter("orders", "", "1")?.add(3, &[]);

    registry.shutdown(Duration::from_secs(1)).await;

    let names: Vec<String> = exporter.spans().into_iter().map(|s| s.name).collect();
    assert!(names.contains(&"cart_op".to_string()));
    assert!(names.contains(&"order_op".to_string()));
    let scopes: Vec<String> =
        exporter.metric_snapshots().into_iter().map(|s| s.scope).collect();
    assert_eq!(scopes, vec!["order-2.0.0".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_warmup_yields_one_pipeline_set() -> Result<()> {
    let (registry, exporter) = registry_with(fast_config());
    let registry = Arc::new(registry);

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let bundle = registry.get_or_create("cart", "1.0.0").await.unwrap();
                bundle.tracer.start(format!("op-{i}")).end();
            })
        })
        .collect();
    for task in tasks {
        task.await?;
    }

    registry.shutdown(Duration::from_secs(1)).await;

    // All 32 spans went through a single pipeline: none dropped, none lost.
    assert_eq!(exporter.spans().len(), 32);
    Ok(())
}

#[tokio::test]
async fn test_buffer_overflow_drops_exactly_the_excess() -> Result<()> {
    let mut config = fast_config();
    config.batch.buffer_capacity = 8;
    config.batch.max_batch_size = 8;
    let (registry, exporter) = registry_with(config);
    let bundle = registry.get_or_create("cart", "1.0.0").await?;

    // Synchronous burst: the worker cannot flush mid-burst because nothing
    // yields until the loop finishes.
    for i in 0..20u32 {
        let mut span = bundle.tracer.start(format!("op-{i}"));
        span.set_attribute("seq", i);
        span.end();
    }
    let stats = bundle.tracer.stats();
    assert_eq!(stats.dropped, 12);

    registry.shutdown(Duration::from_secs(1)).await;
    let spans = exporter.spans();
    assert_eq!(spans.len(), 8);
    // The oldest 8 survived, in completion order.
    let names: Vec<String> = spans.into_iter().map(|s| s.name).collect();
    let expected: Vec<String> = (0..8).map(|i| format!("op-{i}")).collect();
    assert_eq!(names, expected);
    Ok(())
}

#[tokio::test]
async fn test_batches_flush_in_completion_order() -> Result<()> {
    let mut config = fast_config();
    config.batch.max_batch_size = 256;
    let (registry, exporter) = registry_with(config);
    let bundle = registry.get_or_create("cart", "1.0.0").await?;

    for i in 0..10u32 {
        bundle.tracer.start(format!("op-{i}")).end();
    }
    registry.shutdown(Duration::from_secs(1)).await;

    let names: Vec<String> = exporter.spans().into_iter().map(|s| s.name).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("op-{i}")).collect();
    assert_eq!(names, expected);
    Ok(())
}

#[tokio::test]
async fn test_noop_mode_never_touches_the_exporter() -> Result<()> {
    let config = TelemetryConfig {
        disabled: true,
        ..fast_config()
    };
    let (registry, exporter) = registry_with(config);
    let bundle = registry.get_or_create("cart", "1.0.0").await?;
    assert!(bundle.is_noop());

    let hits = bundle.meter.counter("hits", "", "1")?;
    for _ in 0..1_000 {
        hits.add(1, &[]);
        bundle.tracer.start("noop").end();
    }
    registry.shutdown(Duration::from_secs(1)).await;

    assert_eq!(exporter.export_calls(), 0);
    assert_eq!(bundle.tracer.stats(), lumen_telemetry::PipelineStats::default());
    Ok(())
}

#[tokio::test]
async fn test_ambient_tracing_events_reach_the_log_pipeline() -> Result<()> {
    let (registry, exporter) = registry_with(fast_config());
    let bundle = registry.get_or_create("ui-bridge", "1.0.0").await?;
    assert!(!bundle.is_noop());

    // No call-site changes: a plain tracing macro is mirrored in.
    tracing::info!(cart_id = 9, "ambient checkout started");

    registry.shutdown(Duration::from_secs(1)).await;
    let logs = exporter.logs();
    assert!(logs.iter().any(|r| r.body == "ambient checkout started"));
    Ok(())
}

#[tokio::test]
async fn test_shutdown_twice_matches_shutdown_once() -> Result<()> {
    let (registry, exporter) = registry_with(fast_config());
    let bundle = registry.get_or_create("cart", "1.0.0").await?;
    bundle.tracer.start("only").end();

    registry.shutdown(Duration::from_secs(1)).await;
    let calls_after_first = exporter.export_calls();
    registry.shutdown(Duration::from_secs(1)).await;

    assert_eq!(exporter.export_calls(), calls_after_first);
    assert_eq!(exporter.spans().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_with_span_failure_keeps_business_error_intact() -> Result<()> {
    let (registry, exporter) = registry_with(fast_config());
    let bundle = registry.get_or_create("cart", "1.0.0").await?;

    let result: Result<(), String> = with_span("checkout", &bundle.tracer, || async {
        Err("card declined".to_string())
    })
    .await;
    assert_eq!(result.unwrap_err(), "card declined");

    registry.shutdown(Duration::from_secs(1)).await;
    let spans = exporter.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, SpanStatus::Error);
    Ok(())
}
