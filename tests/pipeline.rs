use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use cumulo::bus::{Bus, Event};
use cumulo::publish::{MemoryPublisher, Publisher};
use cumulo::reporter::record::{OutputRecord, Unit};
use cumulo::reporter::spec::{Measurements, Metadata, MetricKind, MetricSpec, SpecHandle};
use cumulo::reporter::{Reporter, ReporterConfig};

fn measurements(pairs: &[(&str, f64)]) -> Measurements {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), json!(v)))
        .collect()
}

fn metadata(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), json!(v)))
        .collect()
}

fn event(name: &str, ms: &[(&str, f64)], md: &[(&str, &str)]) -> Event {
    Event::new(name, measurements(ms), metadata(md))
}

fn reporter_config(push_interval: Duration) -> ReporterConfig {
    ReporterConfig {
        namespace: "PipelineTest".to_string(),
        push_interval,
        sample_rate: 1.0,
    }
}

fn start_reporter(
    specs: Vec<SpecHandle>,
    cfg: ReporterConfig,
    bus: &Bus,
) -> (Reporter, MemoryPublisher, CancellationToken) {
    let memory = MemoryPublisher::new();
    let mut reporter = Reporter::new(cfg, specs, bus, Publisher::Memory(memory.clone()));
    let ctx = CancellationToken::new();
    reporter.start(ctx.clone()).expect("reporter should start");
    (reporter, memory, ctx)
}

async fn wait_for_batches(publisher: &MemoryPublisher, want: usize) {
    for _ in 0..300 {
        if publisher.batch_count() >= want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {want} published batch(es)");
}

fn find<'a>(records: &'a [OutputRecord], name: &str) -> &'a OutputRecord {
    records
        .iter()
        .find(|r| r.metric_name == name)
        .unwrap_or_else(|| panic!("no record named {name}"))
}

#[tokio::test]
async fn interval_flush_carries_all_aggregation_kinds() {
    let bus = Bus::new();
    let specs = vec![
        SpecHandle::new(
            MetricSpec::new("http.request.count", MetricKind::Counter).with_tags(["method"]),
        ),
        SpecHandle::new(
            MetricSpec::new("http.request.duration", MetricKind::Summary).with_unit("millisecond"),
        ),
        SpecHandle::new(MetricSpec::new("db.query.rows", MetricKind::Sum)),
        SpecHandle::new(MetricSpec::new("queue.poll.depth", MetricKind::LastValue)),
    ];
    let (mut reporter, memory, ctx) =
        start_reporter(specs, reporter_config(Duration::from_millis(200)), &bus);

    bus.publish(event(
        "http.request",
        &[("duration", 10.0), ("count", 1.0)],
        &[("method", "GET")],
    ));
    bus.publish(event(
        "http.request",
        &[("duration", 20.0), ("count", 1.0)],
        &[("method", "GET")],
    ));
    bus.publish(event(
        "http.request",
        &[("duration", 30.0), ("count", 1.0)],
        &[("method", "POST")],
    ));
    bus.publish(event("db.query", &[("rows", 5.0)], &[]));
    bus.publish(event("db.query", &[("rows", 7.0)], &[]));
    bus.publish(event("queue.poll", &[("depth", 4.0)], &[]));
    bus.publish(event("queue.poll", &[("depth", 9.0)], &[]));

    wait_for_batches(&memory, 1).await;
    let batches = memory.sent();
    let batch = &batches[0];
    assert_eq!(batch.namespace, "PipelineTest");

    let records = &batch.records;
    assert_eq!(records.len(), 5);

    // Summaries drain first, last values drain last.
    assert_eq!(records[0].metric_name, "http.request.duration");
    assert_eq!(records[records.len() - 1].metric_name, "queue.poll.depth");

    let duration = find(records, "http.request.duration");
    assert_eq!(duration.values.as_deref(), Some(&[10.0, 20.0, 30.0][..]));
    assert_eq!(duration.value, None);
    assert_eq!(duration.unit, Unit::Milliseconds);

    let counters: Vec<&OutputRecord> = records
        .iter()
        .filter(|r| r.metric_name == "http.request.count")
        .collect();
    assert_eq!(counters.len(), 2);
    let by_method = |method: &str| {
        counters
            .iter()
            .find(|r| {
                r.dimensions
                    .pairs()
                    .iter()
                    .any(|(k, v)| k == "method" && v == method)
            })
            .copied()
            .unwrap_or_else(|| panic!("no counter row for method {method}"))
    };
    assert_eq!(by_method("GET").value, Some(2.0));
    assert_eq!(by_method("POST").value, Some(1.0));
    assert_eq!(by_method("GET").unit, Unit::Count);

    let rows = find(records, "db.query.rows");
    assert_eq!(rows.value, Some(12.0));
    assert_eq!(rows.unit, Unit::None);

    let depth = find(records, "queue.poll.depth");
    assert_eq!(depth.value, Some(9.0));

    ctx.cancel();
    reporter.wait_for_shutdown().await;
    // The interval flush already drained everything; shutdown adds nothing.
    assert_eq!(memory.batch_count(), 1);
}

#[tokio::test]
async fn metric_count_ceiling_flushes_without_waiting() {
    let bus = Bus::new();
    let specs = vec![SpecHandle::new(
        MetricSpec::new("api.call.count", MetricKind::Counter).with_tags(["route"]),
    )];
    let (mut reporter, memory, ctx) =
        start_reporter(specs, reporter_config(Duration::from_secs(3600)), &bus);

    for i in 0..20 {
        let route = format!("/r{i}");
        bus.publish(event(
            "api.call",
            &[("count", 1.0)],
            &[("route", route.as_str())],
        ));
    }

    wait_for_batches(&memory, 1).await;
    let batches = memory.sent();
    assert_eq!(batches[0].records.len(), 20);
    assert!(batches[0].records.iter().all(|r| r.value == Some(1.0)));

    ctx.cancel();
    reporter.wait_for_shutdown().await;
    assert_eq!(memory.batch_count(), 1);
}

#[tokio::test]
async fn summary_value_ceiling_flushes_without_waiting() {
    let bus = Bus::new();
    let specs = vec![SpecHandle::new(MetricSpec::new(
        "http.request.duration",
        MetricKind::Summary,
    ))];
    let (mut reporter, memory, ctx) =
        start_reporter(specs, reporter_config(Duration::from_secs(3600)), &bus);

    for i in 0..150 {
        bus.publish(event("http.request", &[("duration", f64::from(i))], &[]));
    }

    wait_for_batches(&memory, 1).await;
    let batches = memory.sent();
    assert_eq!(batches[0].records.len(), 1);
    let values = batches[0].records[0]
        .values
        .as_ref()
        .expect("summary should carry values");
    assert_eq!(values.len(), 150);
    assert_eq!(values[0], 0.0);
    assert_eq!(values[149], 149.0);

    ctx.cancel();
    reporter.wait_for_shutdown().await;
    assert_eq!(memory.batch_count(), 1);
}

#[tokio::test]
async fn zero_sample_rate_suppresses_all_output() {
    let bus = Bus::new();
    let specs = vec![SpecHandle::new(MetricSpec::new(
        "http.request.count",
        MetricKind::Counter,
    ))];
    let cfg = ReporterConfig {
        namespace: "PipelineTest".to_string(),
        push_interval: Duration::from_millis(50),
        sample_rate: 0.0,
    };
    let (mut reporter, memory, ctx) = start_reporter(specs, cfg, &bus);

    for _ in 0..50 {
        bus.publish(event("http.request", &[("count", 1.0)], &[]));
    }

    // Several intervals elapse with nothing admitted to the cache.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(memory.batch_count(), 0);

    ctx.cancel();
    reporter.wait_for_shutdown().await;
    assert_eq!(memory.batch_count(), 0);
}

#[tokio::test]
async fn shutdown_flushes_pending_metrics() {
    let bus = Bus::new();
    let specs = vec![SpecHandle::new(MetricSpec::new(
        "job.finished.count",
        MetricKind::Counter,
    ))];
    let (mut reporter, memory, ctx) =
        start_reporter(specs, reporter_config(Duration::from_secs(3600)), &bus);

    bus.publish(event("job.finished", &[("count", 1.0)], &[]));
    bus.publish(event("job.finished", &[("count", 1.0)], &[]));

    // Let the dispatch loop fold the events before cancelling.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ctx.cancel();
    reporter.wait_for_shutdown().await;

    let batches = memory.sent();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 1);
    assert_eq!(batches[0].records[0].value, Some(2.0));
}

#[tokio::test]
async fn keep_predicates_and_computed_values_apply_in_the_loop() {
    let bus = Bus::new();
    let specs = vec![SpecHandle::new(
        MetricSpec::new("cart.checkout.total", MetricKind::Sum)
            .with_value_fn(|m| {
                let items = m.get("items")?.as_f64()?;
                let unit_price = m.get("unit_price")?.as_f64()?;
                Some(items * unit_price)
            })
            .with_keep(|md| md.get("tenant").and_then(|v| v.as_str()) == Some("paid")),
    )];
    let (mut reporter, memory, ctx) =
        start_reporter(specs, reporter_config(Duration::from_millis(100)), &bus);

    bus.publish(event(
        "cart.checkout",
        &[("items", 3.0), ("unit_price", 2.5)],
        &[("tenant", "paid")],
    ));
    bus.publish(event(
        "cart.checkout",
        &[("items", 10.0), ("unit_price", 9.99)],
        &[("tenant", "free")],
    ));

    wait_for_batches(&memory, 1).await;
    let batches = memory.sent();
    assert_eq!(batches[0].records.len(), 1);
    assert_eq!(batches[0].records[0].value, Some(7.5));

    ctx.cancel();
    reporter.wait_for_shutdown().await;
}
