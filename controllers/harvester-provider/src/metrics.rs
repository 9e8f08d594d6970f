//! Prometheus metrics and probe endpoints.
//!
//! Serves `/healthz` and `/metrics` on the configured address.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Provider metrics registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    deprovisions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "harvester_provider_reconciliations_total",
                "Machine request reconciliations by outcome",
            ),
            &["outcome"],
        )?;
        let deprovisions = IntCounterVec::new(
            Opts::new(
                "harvester_provider_deprovisions_total",
                "Machine deprovisioning attempts by outcome",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(deprovisions.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            deprovisions,
        })
    }

    /// Counts a reconciliation (`provisioned`, `retry`, `failed`, `skipped`).
    pub fn reconciled(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    /// Counts a deprovisioning attempt (`deleted`, `retry`).
    pub fn deprovisioned(&self, outcome: &str) {
        self.deprovisions.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render_metrics(State(metrics): State<Metrics>) -> Response {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http())
}

/// Serves the probe and metrics endpoints until the task is dropped.
pub async fn serve(addr: SocketAddr, metrics: Metrics) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving metrics on {}", addr);

    axum::serve(listener, router(metrics))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}
