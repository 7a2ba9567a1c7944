use anyhow::Result;
use tracing::{debug, info};

use crate::reporter::record::OutputRecord;

/// Publisher that writes batches to the process log. The default backend;
/// also handy for dry-running a config without a remote endpoint.
#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }

    /// Returns the publisher name for logging.
    pub fn name(&self) -> &str {
        "log"
    }

    /// Logs a batch summary at info and each record at debug.
    pub async fn send(&self, batch: &[OutputRecord], namespace: &str) -> Result<()> {
        info!(records = batch.len(), namespace, "batch published to log");

        for record in batch {
            debug!(
                metric = %record.metric_name,
                points = record.point_count(),
                unit = record.unit.as_str(),
                dimensions = record.dimensions.len(),
                "record",
            );
        }

        Ok(())
    }
}
