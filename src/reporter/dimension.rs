use serde::Serialize;
use serde_json::Value;

use super::spec::{Metadata, MetricSpec};

/// Maximum dimensions per metric accepted by the ingestion API.
pub const MAX_DIMENSIONS: usize = 10;

/// Ordered (key, value) dimension pairs attached to a metric data point.
///
/// Order is declared-key order after filtering and is part of the
/// aggregation key, so extraction must stay deterministic for a given
/// spec and metadata map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DimensionSet(Vec<(String, String)>);

impl DimensionSet {
    /// Extracts the dimension set for one event: candidate values from the
    /// spec's tag extractor (default: the metadata map itself), restricted
    /// to the declared tag keys in declared order, string-coerced, with
    /// empty values dropped and the result capped at `MAX_DIMENSIONS`.
    ///
    /// Returns None when the tag extractor panicked; the caller drops the
    /// event.
    pub fn extract(spec: &MetricSpec, metadata: &Metadata) -> Option<Self> {
        if spec.tag_keys().is_empty() {
            return Some(Self::default());
        }

        let candidates = spec.candidate_tags(metadata)?;
        let mut pairs = Vec::with_capacity(spec.tag_keys().len().min(MAX_DIMENSIONS));
        for key in spec.tag_keys() {
            if pairs.len() == MAX_DIMENSIONS {
                break;
            }
            let Some(value) = candidates.get(key) else {
                continue;
            };
            let coerced = coerce(value);
            if coerced.is_empty() {
                continue;
            }
            pairs.push((key.clone(), coerced));
        }

        Some(Self(pairs))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pairs in extraction order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

impl From<Vec<(String, String)>> for DimensionSet {
    fn from(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }
}

/// String form of a metadata value: strings as-is, numbers and booleans via
/// display. Null and structured values coerce to empty, which drops the
/// pair.
fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}
