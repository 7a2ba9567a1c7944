use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::config::MetricDefinition;

/// Measurement payload of one event, keyed by measurement name.
pub type Measurements = serde_json::Map<String, Value>;

/// Free-form event metadata, the source for tag values and predicates.
pub type Metadata = serde_json::Map<String, Value>;

/// Default storage resolution in seconds (standard resolution).
pub const DEFAULT_STORAGE_RESOLUTION: u32 = 60;

/// Aggregation semantics of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Counts admitted events; the measurement value itself is discarded.
    Counter,
    /// Running total of measurement values.
    Sum,
    /// Most recent measurement wins.
    LastValue,
    /// Every raw measurement, kept in receipt order.
    Summary,
}

impl MetricKind {
    /// Parses the configuration string form ("counter", "sum", ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counter" => Some(Self::Counter),
            "sum" => Some(Self::Sum),
            "last_value" => Some(Self::LastValue),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }

    /// Canonical string form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Sum => "sum",
            Self::LastValue => "last_value",
            Self::Summary => "summary",
        }
    }

    /// Suffix appended to the metric name on export.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Counter => ".count",
            Self::Sum => ".sum",
            Self::LastValue => ".last_value",
            Self::Summary => ".summary",
        }
    }
}

/// How the numeric measurement is pulled out of the measurement map.
#[derive(Clone)]
pub enum ValueSource {
    /// Direct key lookup.
    Key(String),
    /// Caller-supplied function over the whole measurement map.
    Compute(Arc<dyn Fn(&Measurements) -> Option<f64> + Send + Sync>),
}

/// Function deriving candidate tag values from event metadata.
pub type TagExtractor = Arc<dyn Fn(&Metadata) -> Metadata + Send + Sync>;

/// Predicate over event metadata.
pub type MetadataPredicate = Arc<dyn Fn(&Metadata) -> bool + Send + Sync>;

/// Outcome of resolving the measurement for one event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueOutcome {
    /// No value present; the event is a silent non-event for this metric.
    Absent,
    /// A usable numeric value.
    Number(f64),
    /// A value was present but is not a number.
    NonNumeric,
}

/// Runtime definition of one metric: name, kind, where its measurement and
/// tags come from, and which events it admits.
pub struct MetricSpec {
    name: String,
    kind: MetricKind,
    event: Arc<str>,
    value: ValueSource,
    unit: Option<String>,
    tag_keys: Vec<String>,
    tag_values: Option<TagExtractor>,
    keep: Option<MetadataPredicate>,
    drop: Option<MetadataPredicate>,
    storage_resolution: u32,
}

impl MetricSpec {
    /// Creates a spec for a dotted metric name. The event name defaults to
    /// every segment but the last, the measurement key to the last segment:
    /// "http.request.duration" listens on "http.request" and reads
    /// "duration".
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        let name = name.into();
        let (event, measurement) = split_name(&name);
        Self {
            name,
            kind,
            event: Arc::from(event.as_str()),
            value: ValueSource::Key(measurement),
            unit: None,
            tag_keys: Vec::new(),
            tag_values: None,
            keep: None,
            drop: None,
            storage_resolution: DEFAULT_STORAGE_RESOLUTION,
        }
    }

    /// Overrides the event name this spec listens on.
    pub fn with_event(mut self, event: &str) -> Self {
        self.event = Arc::from(event);
        self
    }

    /// Overrides the measurement key.
    pub fn with_measurement_key(mut self, key: impl Into<String>) -> Self {
        self.value = ValueSource::Key(key.into());
        self
    }

    /// Replaces the measurement key with a function over the whole map.
    pub fn with_value_fn(
        mut self,
        f: impl Fn(&Measurements) -> Option<f64> + Send + Sync + 'static,
    ) -> Self {
        self.value = ValueSource::Compute(Arc::new(f));
        self
    }

    /// Sets the measurement unit (singular lowercase, e.g. "millisecond").
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Declares the tag keys reported as dimensions, in order.
    pub fn with_tags<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a function deriving candidate tag values from metadata.
    /// Without one, the metadata map itself is the candidate set.
    pub fn with_tag_values(
        mut self,
        f: impl Fn(&Metadata) -> Metadata + Send + Sync + 'static,
    ) -> Self {
        self.tag_values = Some(Arc::new(f));
        self
    }

    /// Admits an event only when the predicate returns true.
    pub fn with_keep(mut self, f: impl Fn(&Metadata) -> bool + Send + Sync + 'static) -> Self {
        self.keep = Some(Arc::new(f));
        self
    }

    /// Rejects an event when the predicate returns true. Ignored if a keep
    /// predicate is also set; keep takes precedence.
    pub fn with_drop(mut self, f: impl Fn(&Metadata) -> bool + Send + Sync + 'static) -> Self {
        self.drop = Some(Arc::new(f));
        self
    }

    /// Sets the storage resolution in seconds.
    pub fn with_storage_resolution(mut self, seconds: u32) -> Self {
        self.storage_resolution = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn event(&self) -> &Arc<str> {
        &self.event
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn tag_keys(&self) -> &[String] {
        &self.tag_keys
    }

    pub fn storage_resolution(&self) -> u32 {
        self.storage_resolution
    }

    /// Export name: the dotted name plus the kind suffix.
    pub fn suffixed_name(&self) -> String {
        format!("{}{}", self.name, self.kind.suffix())
    }

    /// Resolves the numeric measurement for one event. A missing key, JSON
    /// null, or a value function returning None is an absence; a present
    /// non-numeric value is reported as such so the caller can log it.
    pub fn resolve_value(&self, measurements: &Measurements) -> ValueOutcome {
        match &self.value {
            ValueSource::Key(key) => match measurements.get(key) {
                None | Some(Value::Null) => ValueOutcome::Absent,
                Some(v) => match v.as_f64() {
                    Some(n) => ValueOutcome::Number(n),
                    None => ValueOutcome::NonNumeric,
                },
            },
            ValueSource::Compute(f) => {
                match guard(&self.name, "value function", || f(measurements)) {
                    Some(Some(n)) => ValueOutcome::Number(n),
                    // A panic is already logged by the guard; treat it like
                    // an absent value so the event is dropped quietly.
                    Some(None) | None => ValueOutcome::Absent,
                }
            }
        }
    }

    /// Evaluates the keep/drop predicates. Keep wins when both are set; a
    /// panicking predicate drops the event.
    pub fn admits(&self, metadata: &Metadata) -> bool {
        if let Some(keep) = &self.keep {
            return guard(&self.name, "keep predicate", || keep(metadata)).unwrap_or(false);
        }
        if let Some(drop) = &self.drop {
            return !guard(&self.name, "drop predicate", || drop(metadata)).unwrap_or(true);
        }
        true
    }

    /// Produces the candidate tag map for one event, or None when the
    /// extractor panicked and the event must be dropped.
    pub fn candidate_tags<'a>(
        &self,
        metadata: &'a Metadata,
    ) -> Option<std::borrow::Cow<'a, Metadata>> {
        match &self.tag_values {
            None => Some(std::borrow::Cow::Borrowed(metadata)),
            Some(f) => guard(&self.name, "tag extractor", || f(metadata))
                .map(std::borrow::Cow::Owned),
        }
    }
}

impl fmt::Debug for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("event", &self.event)
            .field("unit", &self.unit)
            .field("tag_keys", &self.tag_keys)
            .field("storage_resolution", &self.storage_resolution)
            .finish_non_exhaustive()
    }
}

/// Shared handle to a registered metric spec.
///
/// Aggregation identity is the handle itself: handles compare and hash by
/// pointer, so re-registering a structurally identical spec starts fresh
/// accumulators instead of colliding with stale state. This also sidesteps
/// structural comparison of the function-valued fields.
#[derive(Clone)]
pub struct SpecHandle(Arc<MetricSpec>);

impl SpecHandle {
    pub fn new(spec: MetricSpec) -> Self {
        Self(Arc::new(spec))
    }
}

impl Deref for SpecHandle {
    type Target = MetricSpec;

    fn deref(&self) -> &MetricSpec {
        &self.0
    }
}

impl PartialEq for SpecHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SpecHandle {}

impl Hash for SpecHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for SpecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpecHandle({} {})", self.0.kind.as_str(), self.0.name)
    }
}

/// Warns about configured definitions whose kind is not recognized. The
/// definition stays in the config; it just never aggregates.
pub fn validate_definitions(definitions: &[MetricDefinition]) {
    for def in definitions {
        if MetricKind::parse(&def.kind).is_none() {
            warn!(
                metric = %def.name,
                kind = %def.kind,
                "unrecognized metric kind, definition will not aggregate",
            );
        }
    }
}

/// Builds runtime specs from configured definitions, skipping those with an
/// unrecognized kind (already warned about by `validate_definitions`).
pub fn specs_from_definitions(definitions: &[MetricDefinition]) -> Vec<SpecHandle> {
    definitions
        .iter()
        .filter_map(|def| {
            let kind = MetricKind::parse(&def.kind)?;
            let mut spec = MetricSpec::new(def.name.clone(), kind);
            if let Some(event) = &def.event {
                spec = spec.with_event(event);
            }
            if let Some(measurement) = &def.measurement {
                spec = spec.with_measurement_key(measurement.clone());
            }
            if let Some(unit) = &def.unit {
                spec = spec.with_unit(unit.clone());
            }
            if !def.tags.is_empty() {
                spec = spec.with_tags(def.tags.iter().cloned());
            }
            if let Some(seconds) = def.storage_resolution {
                spec = spec.with_storage_resolution(seconds);
            }
            Some(SpecHandle::new(spec))
        })
        .collect()
}

/// Splits a dotted metric name into its default (event, measurement key)
/// pair. A name with a single segment uses it for both.
fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(idx) => (name[..idx].to_string(), name[idx + 1..].to_string()),
        None => (name.to_string(), name.to_string()),
    }
}

/// Runs a user-supplied callback, containing panics so one bad metric
/// definition cannot unwind the dispatch loop.
fn guard<T>(metric: &str, stage: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(metric, stage, "user callback panicked, event dropped");
            None
        }
    }
}
