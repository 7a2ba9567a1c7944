use serde::{Serialize, Serializer};

use super::dimension::DimensionSet;
use super::spec::MetricKind;

/// CloudWatch-style unit attached to an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Seconds,
    Microseconds,
    Milliseconds,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
    Bits,
    Kilobits,
    Megabits,
    Gigabits,
    Terabits,
    Count,
    None,
}

impl Unit {
    /// Maps a configured unit and metric kind to the exported unit: a
    /// recognized configured unit wins, then Counter reports `Count`,
    /// everything else `None`.
    pub fn resolve(configured: Option<&str>, kind: MetricKind) -> Self {
        if let Some(mapped) = configured.and_then(Self::from_configured) {
            return mapped;
        }
        if kind == MetricKind::Counter {
            return Self::Count;
        }
        Self::None
    }

    /// Recognized configuration spellings (singular, lowercase).
    fn from_configured(unit: &str) -> Option<Self> {
        match unit {
            "second" => Some(Self::Seconds),
            "microsecond" => Some(Self::Microseconds),
            "millisecond" => Some(Self::Milliseconds),
            "byte" => Some(Self::Bytes),
            "kilobyte" => Some(Self::Kilobytes),
            "megabyte" => Some(Self::Megabytes),
            "gigabyte" => Some(Self::Gigabytes),
            "terabyte" => Some(Self::Terabytes),
            "bit" => Some(Self::Bits),
            "kilobit" => Some(Self::Kilobits),
            "megabit" => Some(Self::Megabits),
            "gigabit" => Some(Self::Gigabits),
            "terabit" => Some(Self::Terabits),
            _ => None,
        }
    }

    /// Exported name, capitalized and pluralized.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "Seconds",
            Self::Microseconds => "Microseconds",
            Self::Milliseconds => "Milliseconds",
            Self::Bytes => "Bytes",
            Self::Kilobytes => "Kilobytes",
            Self::Megabytes => "Megabytes",
            Self::Gigabytes => "Gigabytes",
            Self::Terabytes => "Terabytes",
            Self::Bits => "Bits",
            Self::Kilobits => "Kilobits",
            Self::Megabits => "Megabits",
            Self::Gigabits => "Gigabits",
            Self::Terabits => "Terabits",
            Self::Count => "Count",
            Self::None => "None",
        }
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One publishable data point set produced by a drain.
#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    /// Dotted metric name with the kind suffix.
    pub metric_name: String,
    /// Scalar value (Counter, Sum, LastValue).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Raw values in receipt order (Summary).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
    pub dimensions: DimensionSet,
    pub unit: Unit,
    pub storage_resolution: u32,
}

impl OutputRecord {
    /// Number of data points this record contributes to a batch.
    pub fn point_count(&self) -> usize {
        match &self.values {
            Some(values) => values.len(),
            None => 1,
        }
    }
}
