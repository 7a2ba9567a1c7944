use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::reporter::ReporterConfig;

/// Top-level configuration for the cumulo agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Namespace stamped on every published batch. Default: "Telemetry".
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// How often the flush schedule is checked. Default: 60s.
    #[serde(default = "default_push_interval", with = "humantime_serde")]
    pub push_interval: Duration,

    /// Fraction of events folded into the cache, in [0.0, 1.0]. Default: 1.0.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Metrics to aggregate.
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,

    /// HTTP ingest listener configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Publisher backend configuration.
    #[serde(default)]
    pub publisher: PublisherConfig,
}

/// Declaration of one metric to aggregate.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricDefinition {
    /// Output metric name, e.g. "http.request.duration".
    pub name: String,

    /// Aggregation kind (counter, sum, last_value, summary).
    pub kind: String,

    /// Event name to listen on. Default: the name minus its last segment.
    #[serde(default)]
    pub event: Option<String>,

    /// Measurement key to read from matching events. Default: the name's
    /// last segment.
    #[serde(default)]
    pub measurement: Option<String>,

    /// Unit label for published values (e.g. "millisecond", "byte").
    #[serde(default)]
    pub unit: Option<String>,

    /// Metadata keys promoted to dimensions, in declaration order.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Storage resolution in seconds. Default: 60.
    #[serde(default)]
    pub storage_resolution: Option<u32>,
}

/// HTTP ingest listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Enable the HTTP ingest listener. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: "127.0.0.1:8126".
    #[serde(default = "default_ingest_addr")]
    pub listen_addr: String,
}

/// Publisher backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Publisher backend (log, http). Default: "log".
    #[serde(default = "default_publisher_kind")]
    pub kind: String,

    /// HTTP publisher configuration, used when kind is "http".
    #[serde(default)]
    pub http: HttpPublisherConfig,
}

/// HTTP publisher configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpPublisherConfig {
    /// Endpoint to POST metric batches to.
    #[serde(default)]
    pub endpoint: String,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Gzip-compress request bodies. Default: true.
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Additional request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_namespace() -> String {
    "Telemetry".to_string()
}

fn default_push_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_ingest_addr() -> String {
    "127.0.0.1:8126".to_string()
}

fn default_publisher_kind() -> String {
    "log".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            namespace: default_namespace(),
            push_interval: default_push_interval(),
            sample_rate: default_sample_rate(),
            metrics: Vec::new(),
            ingest: IngestConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_ingest_addr(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: default_publisher_kind(),
            http: HttpPublisherConfig::default(),
        }
    }
}

impl Default for HttpPublisherConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_http_timeout(),
            compress: true,
            headers: HashMap::new(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    ///
    /// An unrecognized metric kind is deliberately not an error here: the
    /// definition is kept, warned about at startup, and never aggregates.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            bail!("namespace must not be empty");
        }

        if self.push_interval.is_zero() {
            bail!("push_interval must be positive");
        }

        if !(0.0..=1.0).contains(&self.sample_rate) {
            bail!("sample_rate must be between 0.0 and 1.0");
        }

        if self.metrics.is_empty() {
            bail!("at least one metric must be configured");
        }

        for def in &self.metrics {
            if def.name.is_empty() {
                bail!("metric name must not be empty");
            }
            if let Some(seconds) = def.storage_resolution {
                if seconds == 0 {
                    bail!("storage_resolution must be positive for metric {}", def.name);
                }
            }
        }

        if self.ingest.enabled && self.ingest.listen_addr.is_empty() {
            bail!("ingest.listen_addr is required when ingest is enabled");
        }

        match self.publisher.kind.as_str() {
            "log" => {}
            "http" => {
                if self.publisher.http.endpoint.is_empty() {
                    bail!("publisher.http.endpoint is required when kind is http");
                }
            }
            other => bail!("unknown publisher kind: {other}"),
        }

        Ok(())
    }

    /// Reporter settings derived from the top-level fields.
    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            namespace: self.namespace.clone(),
            push_interval: self.push_interval,
            sample_rate: self.sample_rate,
        }
    }
}
