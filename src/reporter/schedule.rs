use std::time::Instant;

use super::cache::Cache;

/// Most distinct metrics the ingestion API accepts per batch.
pub const MAX_METRICS_PER_BATCH: usize = 20;

/// Most data points the ingestion API accepts for one metric.
pub const MAX_VALUES_PER_METRIC: usize = 150;

/// Which flush condition fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The push interval elapsed with at least one metric accumulated.
    IntervalElapsed,
    /// The batch reached the per-batch metric ceiling.
    MetricCount,
    /// A summary reached the per-metric point ceiling.
    ValueCeiling,
}

impl FlushReason {
    /// Canonical string for log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IntervalElapsed => "interval",
            Self::MetricCount => "metric_count",
            Self::ValueCeiling => "value_ceiling",
        }
    }
}

/// Decides whether the cache must flush now. Pure over cache state; the
/// dispatch loop runs it on every timer tick and inline after every push,
/// so growth is preempted before a batch could breach the API ceilings.
///
/// One push grows the cache by at most one point under one key, so the
/// ceilings are reached exactly; `>=` keeps the decision correct even if
/// that discipline ever changes.
pub fn flush_due(cache: &Cache, now: Instant) -> Option<FlushReason> {
    let metric_count = cache.metric_count();

    if metric_count > 0 && now.duration_since(cache.last_flush()) >= cache.push_interval() {
        return Some(FlushReason::IntervalElapsed);
    }
    if metric_count >= MAX_METRICS_PER_BATCH {
        return Some(FlushReason::MetricCount);
    }
    if cache.max_values_per_metric() >= MAX_VALUES_PER_METRIC {
        return Some(FlushReason::ValueCeiling);
    }

    None
}
