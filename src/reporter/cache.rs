use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

use super::dimension::DimensionSet;
use super::record::{OutputRecord, Unit};
use super::spec::{Measurements, Metadata, MetricKind, SpecHandle, ValueOutcome};

/// Key of one accumulator: the registered spec plus the extracted dimension
/// set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    spec: SpecHandle,
    dimensions: DimensionSet,
}

impl AggregationKey {
    fn into_record(self, value: Option<f64>, values: Option<Vec<f64>>) -> OutputRecord {
        OutputRecord {
            metric_name: self.spec.suffixed_name(),
            value,
            values,
            unit: Unit::resolve(self.spec.unit(), self.spec.kind()),
            storage_resolution: self.spec.storage_resolution(),
            dimensions: self.dimensions,
        }
    }
}

/// In-memory aggregation state between flushes.
///
/// Four buckets partitioned by metric kind, each mapping an AggregationKey
/// to its accumulator. A key lives in exactly one bucket, chosen by the
/// spec's kind at first observation. All state is volatile; nothing
/// survives shutdown. The cache has a single owner (the reporter's dispatch
/// task) and is never shared across threads.
#[derive(Debug)]
pub struct Cache {
    namespace: String,
    push_interval: Duration,
    last_flush: Instant,
    counters: HashMap<AggregationKey, u64>,
    sums: HashMap<AggregationKey, f64>,
    last_values: HashMap<AggregationKey, f64>,
    summaries: HashMap<AggregationKey, Vec<f64>>,
}

impl Cache {
    /// Creates an empty cache with the flush clock starting now.
    pub fn new(namespace: impl Into<String>, push_interval: Duration) -> Self {
        Self {
            namespace: namespace.into(),
            push_interval,
            last_flush: Instant::now(),
            counters: HashMap::new(),
            sums: HashMap::new(),
            last_values: HashMap::new(),
            summaries: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn push_interval(&self) -> Duration {
        self.push_interval
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    /// Stamps the flush clock. The owner calls this after every drain,
    /// whether or not the subsequent publish succeeds.
    pub fn mark_flushed(&mut self, now: Instant) {
        self.last_flush = now;
    }

    /// Folds one event into the accumulator for `spec`.
    ///
    /// An absent measurement is a silent non-event. A present non-numeric
    /// measurement is logged and discarded. A panic inside any of the
    /// spec's callbacks drops the event; the cache is left untouched in
    /// every failure case.
    pub fn push(&mut self, measurements: &Measurements, metadata: &Metadata, spec: &SpecHandle) {
        let outcome = spec.resolve_value(measurements);

        if !spec.admits(metadata) {
            return;
        }

        let value = match outcome {
            ValueOutcome::Absent => return,
            ValueOutcome::NonNumeric => {
                warn!(metric = %spec.name(), "non-numeric measurement, event discarded");
                return;
            }
            ValueOutcome::Number(n) => n,
        };

        let Some(dimensions) = DimensionSet::extract(spec, metadata) else {
            return;
        };

        let key = AggregationKey {
            spec: spec.clone(),
            dimensions,
        };

        match spec.kind() {
            MetricKind::Counter => {
                *self.counters.entry(key).or_insert(0) += 1;
            }
            MetricKind::Sum => {
                *self.sums.entry(key).or_insert(0.0) += value;
            }
            MetricKind::LastValue => {
                self.last_values.insert(key, value);
            }
            MetricKind::Summary => {
                self.summaries.entry(key).or_default().push(value);
            }
        }
    }

    /// Distinct (spec, dimension set) keys across all four buckets.
    pub fn metric_count(&self) -> usize {
        self.counters.len() + self.sums.len() + self.last_values.len() + self.summaries.len()
    }

    /// Largest summary series length; with no summaries, 1 if any other
    /// bucket is non-empty, else 0. Counter, Sum, and LastValue entries
    /// each contribute exactly one data point per flush.
    pub fn max_values_per_metric(&self) -> usize {
        match self.summaries.values().map(Vec::len).max() {
            Some(longest) => longest,
            None => {
                if self.counters.is_empty()
                    && self.sums.is_empty()
                    && self.last_values.is_empty()
                {
                    0
                } else {
                    1
                }
            }
        }
    }

    /// Converts every accumulator to an output record and clears all
    /// buckets. Bucket order is fixed: Summary, Counter, Sum, LastValue.
    /// The flush clock is not advanced here; the caller stamps it.
    pub fn drain(&mut self) -> Vec<OutputRecord> {
        let mut records = Vec::with_capacity(self.metric_count());

        for (key, values) in self.summaries.drain() {
            records.push(key.into_record(None, Some(values)));
        }
        for (key, count) in self.counters.drain() {
            records.push(key.into_record(Some(count as f64), None));
        }
        for (key, total) in self.sums.drain() {
            records.push(key.into_record(Some(total), None));
        }
        for (key, last) in self.last_values.drain() {
            records.push(key.into_record(Some(last), None));
        }

        records
    }
}
