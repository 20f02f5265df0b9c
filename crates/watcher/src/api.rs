//! HTTP API for health checks, Prometheus metrics and poll status

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use anyhow::Context;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use watch_lib::{
    health::{ComponentStatus, HealthRegistry},
    monitor::CycleReport,
    observability::WatchMetrics,
    store::PlaceCatalog,
    Place,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: WatchMetrics,
    pub catalog: Arc<PlaceCatalog>,
    pub reports: watch::Receiver<Option<CycleReport>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: WatchMetrics,
        catalog: Arc<PlaceCatalog>,
        reports: watch::Receiver<Option<CycleReport>>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            catalog,
            reports,
        }
    }
}

#[derive(Debug, Serialize)]
struct PlacesResponse {
    count: usize,
    places: Vec<Place>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a poll has completed
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Latest poll report - 404 until the first poll completes
async fn status(State(state): State<Arc<AppState>>) -> axum::response::Response {
    let latest = state.reports.borrow().clone();
    match latest {
        Some(report) => (StatusCode::OK, Json(report)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No poll completed yet".to_string(),
            }),
        )
            .into_response(),
    }
}

/// Places found by the latest poll
async fn places(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let places = state.catalog.list();
    Json(PlacesResponse {
        count: places.len(),
        places,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/places", get(places))
        .with_state(state)
}

/// Bind the API listener
///
/// Done before spawning the server so a port already in use fails startup.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server to {}", addr))?;
    info!(addr = %addr, "API server listening");
    Ok(listener)
}

/// Serve the API on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    axum::serve(listener, app).await?;

    Ok(())
}
