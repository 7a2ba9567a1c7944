use std::io::Write;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::HttpPublisherConfig;
use crate::reporter::record::OutputRecord;

/// JSON envelope posted per batch.
#[derive(Debug, Serialize)]
struct BatchEnvelope<'a> {
    namespace: &'a str,
    sent_at: String,
    records: &'a [OutputRecord],
}

/// HTTP publisher: one JSON POST per drained batch, gzip-compressed when
/// configured. Request timeouts come from config; there is no retry, a
/// failed send surfaces as an error and the batch is gone.
pub struct HttpPublisher {
    cfg: HttpPublisherConfig,
    client: reqwest::Client,
}

impl HttpPublisher {
    /// Builds the publisher and its HTTP client.
    pub fn new(cfg: HttpPublisherConfig) -> Result<Self> {
        if cfg.endpoint.is_empty() {
            bail!("http publisher endpoint must be set");
        }

        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self { cfg, client })
    }

    /// Returns the publisher name for logging.
    pub fn name(&self) -> &str {
        "http"
    }

    /// Serializes the batch into its envelope, compresses when configured,
    /// and posts it. Any non-2xx status is an error.
    pub async fn send(&self, batch: &[OutputRecord], namespace: &str) -> Result<()> {
        let envelope = BatchEnvelope {
            namespace,
            sent_at: format_datetime(Utc::now()),
            records: batch,
        };
        let body = serde_json::to_vec(&envelope).context("serializing batch to JSON")?;
        let raw_len = body.len();

        let mut request = self
            .client
            .post(&self.cfg.endpoint)
            .header("Content-Type", "application/json");

        if self.cfg.compress {
            request = request
                .header("Content-Encoding", "gzip")
                .body(compress_gzip(&body)?);
        } else {
            request = request.body(body);
        }

        for (k, v) in &self.cfg.headers {
            request = request.header(k.as_str(), v.as_str());
        }

        let resp = request.send().await.context("sending publish request")?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            bail!("publish rejected with status {status}");
        }

        debug!(
            records = batch.len(),
            bytes = raw_len,
            "batch published via HTTP",
        );

        Ok(())
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("gzip write")?;
    encoder.finish().context("gzip finish")
}

/// Formats a timestamp as "2026-01-02 15:04:05.000" in UTC.
fn format_datetime(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::dimension::DimensionSet;
    use crate::reporter::record::Unit;
    use serde_json::json;

    #[test]
    fn empty_endpoint_is_rejected() {
        let cfg = HttpPublisherConfig::default();
        assert!(HttpPublisher::new(cfg).is_err());
    }

    #[test]
    fn gzip_round_trip() {
        let data = b"a batch body worth compressing, compressing, compressing";
        let compressed = compress_gzip(data).expect("gzip compress");
        assert!(compressed.len() < data.len());

        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut out).expect("gzip decompress");
        assert_eq!(out, data);
    }

    #[test]
    fn envelope_carries_namespace_and_records() {
        let records = vec![OutputRecord {
            metric_name: "a.value.sum".to_string(),
            value: Some(1.0),
            values: None,
            dimensions: DimensionSet::default(),
            unit: Unit::None,
            storage_resolution: 60,
        }];
        let envelope = BatchEnvelope {
            namespace: "Telemetry",
            sent_at: "2026-01-02 03:04:05.678".to_string(),
            records: &records,
        };

        let v = serde_json::to_value(&envelope).unwrap();
        assert_eq!(v["namespace"], json!("Telemetry"));
        assert_eq!(v["records"][0]["metric_name"], json!("a.value.sum"));
    }

    #[test]
    fn datetime_format_is_millisecond_utc() {
        let t = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.678Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_datetime(t), "2026-01-02 03:04:05.678");
    }
}
