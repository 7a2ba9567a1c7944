use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bus::Bus;
use crate::config::Config;
use crate::ingest::IngestServer;
use crate::publish::Publisher;
use crate::reporter::spec::{specs_from_definitions, validate_definitions, SpecHandle};
use crate::reporter::Reporter;

/// App orchestrates all components: bus, reporter, publisher, ingest.
pub struct App {
    cfg: Config,
    bus: Bus,
    extra_specs: Vec<SpecHandle>,
    reporter: Option<Reporter>,
    ingest: Option<IngestServer>,
    cancel: CancellationToken,
}

impl App {
    /// Creates a new App over a fresh bus.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            bus: Bus::new(),
            extra_specs: Vec::new(),
            reporter: None,
            ingest: None,
            cancel: CancellationToken::new(),
        }
    }

    /// The event bus producers publish into.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Registers a programmatic spec (computed values, keep/drop predicates,
    /// tag extractors) alongside the config-driven definitions. Must be
    /// called before `start`.
    pub fn add_spec(&mut self, spec: SpecHandle) {
        self.extra_specs.push(spec);
    }

    /// Start all components and begin aggregating.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Build metric specs from config, warning about inert definitions.
        validate_definitions(&self.cfg.metrics);
        let mut specs = specs_from_definitions(&self.cfg.metrics);
        specs.append(&mut self.extra_specs);
        info!(
            configured = self.cfg.metrics.len(),
            active = specs.len(),
            "metric definitions loaded",
        );

        // 2. Build the publisher backend.
        let publisher =
            Publisher::from_config(&self.cfg.publisher).context("creating publisher")?;

        // 3. Start the reporter dispatch loop.
        let mut reporter = Reporter::new(self.cfg.reporter_config(), specs, &self.bus, publisher);
        reporter
            .start(self.cancel.child_token())
            .context("starting reporter")?;
        self.reporter = Some(reporter);

        // 4. Start the ingest listener if enabled.
        if self.cfg.ingest.enabled {
            let ingest = IngestServer::new(self.cfg.ingest.clone(), self.bus.clone());
            ingest.start().await.context("starting ingest server")?;
            self.ingest = Some(ingest);
        }

        info!("agent fully started");

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal the reporter loop to stop; it performs a final flush.
        self.cancel.cancel();

        if let Some(reporter) = &mut self.reporter {
            reporter.wait_for_shutdown().await;
        }

        if let Some(ingest) = &self.ingest {
            ingest.stop().await?;
        }

        Ok(())
    }
}
