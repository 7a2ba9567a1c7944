mod http;
mod log;
mod memory;

pub use http::HttpPublisher;
pub use log::LogPublisher;
pub use memory::{MemoryPublisher, PublishedBatch};

use anyhow::{bail, Result};

use crate::config::PublisherConfig;
use crate::reporter::record::OutputRecord;

/// Publisher dispatches drained record batches to a backend.
///
/// Uses enum dispatch rather than trait objects for zero-cost async dispatch
/// (avoids `Pin<Box<dyn Future>>` overhead on every send call).
pub enum Publisher {
    Http(HttpPublisher),
    Log(LogPublisher),
    Memory(MemoryPublisher),
}

impl Publisher {
    /// Builds the backend selected by config. The memory backend is not
    /// configurable; it is constructed directly by tests.
    pub fn from_config(cfg: &PublisherConfig) -> Result<Self> {
        match cfg.kind.as_str() {
            "log" => Ok(Self::Log(LogPublisher::new())),
            "http" => Ok(Self::Http(HttpPublisher::new(cfg.http.clone())?)),
            other => bail!("unknown publisher kind: {other}"),
        }
    }

    /// Returns the publisher name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Http(p) => p.name(),
            Self::Log(p) => p.name(),
            Self::Memory(p) => p.name(),
        }
    }

    /// Publishes one drained batch under the namespace. Batch bounds
    /// (≤ 20 metrics, ≤ 150 points per metric) are guaranteed by the flush
    /// scheduler; backends do not re-validate them.
    pub async fn send(&self, batch: &[OutputRecord], namespace: &str) -> Result<()> {
        match self {
            Self::Http(p) => p.send(batch, namespace).await,
            Self::Log(p) => p.send(batch, namespace).await,
            Self::Memory(p) => p.send(batch, namespace).await,
        }
    }
}
