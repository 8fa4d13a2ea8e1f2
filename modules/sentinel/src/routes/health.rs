//! Liveness, readiness, and detailed health endpoints
//!
//! `/healthz` answers 200 whenever the process is up. `/readyz` consults the
//! health checker and answers 503 until every critical dependency is healthy
//! and no circuit breaker is open. `/api/health[/{service}]` exposes the
//! detailed view. All of these are tenant-exempt by router construction.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::metrics;
use crate::state::AppState;

/// Handler for `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sentinel-rs",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for `GET /readyz`
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let system = state.health.system_health(false).await;

    let status = if system.overall_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "ready": system.overall_healthy,
            "open_circuit_breakers": system.open_circuit_breakers,
        })),
    )
}

/// Handler for `GET /api/health`
pub async fn detailed_health(State(state): State<AppState>) -> impl IntoResponse {
    let system = state.health.system_health(false).await;
    Json(json!({
        "overall_healthy": system.overall_healthy,
        "services": system.services,
        "open_circuit_breakers": system.open_circuit_breakers,
    }))
}

/// Handler for `GET /api/health/{service}`
pub async fn service_health(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> impl IntoResponse {
    match state.health.check_service(&service, false).await {
        Some(health) => (StatusCode::OK, Json(json!(health))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown service '{service}'")})),
        )
            .into_response(),
    }
}

/// Handler for `GET /metrics`
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::gather(),
    )
}
