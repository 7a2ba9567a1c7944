use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::reporter::record::OutputRecord;

/// One captured publish call.
#[derive(Debug, Clone)]
pub struct PublishedBatch {
    pub namespace: String,
    pub records: Vec<OutputRecord>,
}

/// Publisher that captures batches in memory. Clones share the same
/// storage, so tests hand one clone to the reporter and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    sent: Arc<Mutex<Vec<PublishedBatch>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the publisher name for logging.
    pub fn name(&self) -> &str {
        "memory"
    }

    pub async fn send(&self, batch: &[OutputRecord], namespace: &str) -> Result<()> {
        self.sent.lock().push(PublishedBatch {
            namespace: namespace.to_string(),
            records: batch.to_vec(),
        });
        Ok(())
    }

    /// Everything captured so far.
    pub fn sent(&self) -> Vec<PublishedBatch> {
        self.sent.lock().clone()
    }

    /// Number of captured batches.
    pub fn batch_count(&self) -> usize {
        self.sent.lock().len()
    }
}
