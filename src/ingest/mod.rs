use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bus::{Bus, Event};
use crate::config::IngestConfig;
use crate::reporter::spec::{Measurements, Metadata};

/// HTTP ingest listener.
///
/// Accepts JSON telemetry events over HTTP and republishes them on the
/// in-process bus, so producers outside the process feed the same
/// aggregation pipeline as in-process callers.
pub struct IngestServer {
    cfg: IngestConfig,
    bus: Bus,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

/// Body of POST /v1/events.
#[derive(Debug, Deserialize)]
struct IngestEvent {
    /// Event name, e.g. "http.request".
    event: String,

    /// Named numeric readings.
    #[serde(default)]
    measurements: Measurements,

    /// Context tags for dimension extraction.
    #[serde(default)]
    metadata: Metadata,
}

/// Shared state for axum handlers.
struct AppState {
    bus: Bus,
}

impl IngestServer {
    pub fn new(cfg: IngestConfig, bus: Bus) -> Self {
        Self {
            cfg,
            bus,
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Starts the HTTP server serving /v1/events and /healthz.
    pub async fn start(&self) -> Result<()> {
        let state = Arc::new(AppState {
            bus: self.bus.clone(),
        });

        let app = Router::new()
            .route("/v1/events", post(events_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(state);

        let listener = TcpListener::bind(&self.cfg.listen_addr)
            .await
            .with_context(|| format!("listening on {}", self.cfg.listen_addr))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            info!(addr = %local_addr, "ingest server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                error!(error = %e, "ingest server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the ingest server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// POST /v1/events - Publish one event onto the bus.
///
/// Returns 202 regardless of how many subscribers picked the event up;
/// delivery onto the bus is best-effort by design.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<IngestEvent>,
) -> impl IntoResponse {
    if body.event.is_empty() {
        return (StatusCode::BAD_REQUEST, "event name must not be empty");
    }

    let delivered = state
        .bus
        .publish(Event::new(&body.event, body.measurements, body.metadata));
    debug!(event = %body.event, delivered, "ingested event");

    (StatusCode::ACCEPTED, "accepted")
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
