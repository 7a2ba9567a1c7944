pub mod cache;
pub mod dimension;
pub mod record;
pub mod sample;
pub mod schedule;
pub mod spec;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{Bus, Event, Subscription};
use crate::publish::Publisher;

use cache::Cache;
use record::OutputRecord;
use sample::Sampler;
use schedule::FlushReason;
use spec::SpecHandle;

/// Capacity of the funnel channel between the bus and the dispatch loop.
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Settings of one reporter instance.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub namespace: String,
    pub push_interval: Duration,
    pub sample_rate: f64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            namespace: "Telemetry".to_string(),
            push_interval: Duration::from_secs(60),
            sample_rate: 1.0,
        }
    }
}

/// Aggregating metrics reporter.
///
/// Subscribes to the bus at construction; `start` spawns the dispatch loop
/// that owns the cache. Every push, drain, and scheduler check runs on that
/// one task, with events from all producers funnelled through the
/// subscription channel, so the cache never needs a lock.
pub struct Reporter {
    cfg: ReporterConfig,
    specs_by_event: HashMap<Arc<str>, Vec<SpecHandle>>,
    publisher: Option<Publisher>,
    subscription: Option<Subscription>,
    event_rx: Option<mpsc::Receiver<Event>>,
    run_task: Option<tokio::task::JoinHandle<()>>,
}

impl Reporter {
    /// Builds a reporter over `specs` and registers it on the bus for every
    /// event name the specs listen on.
    pub fn new(cfg: ReporterConfig, specs: Vec<SpecHandle>, bus: &Bus, publisher: Publisher) -> Self {
        let mut specs_by_event: HashMap<Arc<str>, Vec<SpecHandle>> = HashMap::new();
        for spec in specs {
            specs_by_event
                .entry(Arc::clone(spec.event()))
                .or_default()
                .push(spec);
        }

        let names: Vec<Arc<str>> = specs_by_event.keys().cloned().collect();
        let (subscription, event_rx) = bus.subscribe(&names, EVENT_CHANNEL_CAPACITY);

        Self {
            cfg,
            specs_by_event,
            publisher: Some(publisher),
            subscription: Some(subscription),
            event_rx: Some(event_rx),
            run_task: None,
        }
    }

    /// Number of distinct event names this reporter listens on.
    pub fn event_count(&self) -> usize {
        self.specs_by_event.len()
    }

    /// Number of registered metric specs.
    pub fn spec_count(&self) -> usize {
        self.specs_by_event.values().map(Vec::len).sum()
    }

    /// Spawns the dispatch loop. The loop runs until `ctx` is cancelled,
    /// then performs one final best-effort flush and drops its bus
    /// subscription.
    pub fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let Some(mut event_rx) = self.event_rx.take() else {
            bail!("reporter already started");
        };
        let subscription = self.subscription.take();
        let publisher = self.publisher.take().context("reporter already started")?;

        let mut cache = Cache::new(self.cfg.namespace.clone(), self.cfg.push_interval);
        let sampler = Sampler::new(self.cfg.sample_rate);
        let specs_by_event = self.specs_by_event.clone();

        info!(
            events = self.event_count(),
            metrics = self.spec_count(),
            namespace = %self.cfg.namespace,
            interval = ?self.cfg.push_interval,
            sample_rate = sampler.rate(),
            publisher = publisher.name(),
            "reporter started",
        );

        self.run_task = Some(tokio::spawn(async move {
            // Dropped on every exit path of the loop, removing the bus
            // registrations.
            let _subscription = subscription;

            const BURST: usize = 64;

            let mut ticker = tokio::time::interval(cache.push_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // interval() fires immediately; consume that tick so the first
            // scheduled check lands one full interval out.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        if cache.metric_count() > 0 {
                            let records = cache.drain();
                            cache.mark_flushed(Instant::now());
                            publish(&publisher, &records, cache.namespace(), "shutdown").await;
                        }
                        return;
                    }

                    Some(event) = event_rx.recv() => {
                        handle_event(&mut cache, &sampler, &specs_by_event, &publisher, &event)
                            .await;

                        // Drain a burst without blocking; each event still
                        // gets its own inline flush check.
                        for _ in 0..BURST - 1 {
                            match event_rx.try_recv() {
                                Ok(event) => {
                                    handle_event(
                                        &mut cache,
                                        &sampler,
                                        &specs_by_event,
                                        &publisher,
                                        &event,
                                    )
                                    .await;
                                }
                                Err(_) => break,
                            }
                        }
                    }

                    _ = ticker.tick() => {
                        let now = Instant::now();
                        if let Some(reason) = schedule::flush_due(&cache, now) {
                            flush(&mut cache, &publisher, reason, now).await;
                        }
                    }
                }
            }
        }));

        Ok(())
    }

    /// Waits for the dispatch loop to finish after the token passed to
    /// `start` has been cancelled.
    pub async fn wait_for_shutdown(&mut self) {
        if let Some(task) = self.run_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "reporter task join failed");
            }
        }
    }
}

/// Folds one event into the cache for every matching spec, sampling each
/// (event, spec) pairing and running the flush check inline after every
/// push so growth never breaches the batch ceilings.
async fn handle_event(
    cache: &mut Cache,
    sampler: &Sampler,
    specs_by_event: &HashMap<Arc<str>, Vec<SpecHandle>>,
    publisher: &Publisher,
    event: &Event,
) {
    let Some(specs) = specs_by_event.get(&event.name) else {
        return;
    };

    for spec in specs {
        if !sampler.admit() {
            continue;
        }

        cache.push(&event.measurements, &event.metadata, spec);

        let now = Instant::now();
        if let Some(reason) = schedule::flush_due(cache, now) {
            flush(cache, publisher, reason, now).await;
        }
    }
}

/// Drains the cache, stamps the flush clock, and hands the batch to the
/// publisher. The clock advances before the send, so the attempt is
/// consumed whether or not the publish succeeds.
async fn flush(cache: &mut Cache, publisher: &Publisher, reason: FlushReason, now: Instant) {
    let records = cache.drain();
    cache.mark_flushed(now);
    publish(publisher, &records, cache.namespace(), reason.as_str()).await;
}

async fn publish(publisher: &Publisher, records: &[OutputRecord], namespace: &str, reason: &str) {
    match publisher.send(records, namespace).await {
        Ok(()) => {
            info!(
                publisher = publisher.name(),
                records = records.len(),
                namespace,
                reason,
                "metrics published",
            );
        }
        Err(e) => {
            error!(
                publisher = publisher.name(),
                records = records.len(),
                namespace,
                reason,
                error = %e,
                "publish failed, batch dropped",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::MemoryPublisher;
    use spec::{MetricKind, MetricSpec};

    #[test]
    fn specs_group_by_event_name() {
        let bus = Bus::new();
        let specs = vec![
            SpecHandle::new(MetricSpec::new("http.request.duration", MetricKind::Summary)),
            SpecHandle::new(MetricSpec::new("http.request.count", MetricKind::Counter)),
            SpecHandle::new(MetricSpec::new("db.query.time", MetricKind::Sum)),
        ];
        let reporter = Reporter::new(
            ReporterConfig::default(),
            specs,
            &bus,
            Publisher::Memory(MemoryPublisher::new()),
        );

        assert_eq!(reporter.event_count(), 2);
        assert_eq!(reporter.spec_count(), 3);
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let bus = Bus::new();
        let mut reporter = Reporter::new(
            ReporterConfig::default(),
            vec![SpecHandle::new(MetricSpec::new("a.b", MetricKind::Counter))],
            &bus,
            Publisher::Memory(MemoryPublisher::new()),
        );

        let ctx = CancellationToken::new();
        reporter.start(ctx.clone()).unwrap();
        assert!(reporter.start(ctx.clone()).is_err());

        ctx.cancel();
        reporter.wait_for_shutdown().await;
    }
}
