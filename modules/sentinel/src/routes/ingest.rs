//! Ingestion endpoints
//!
//! `POST /ingest/{shopify|wms|carrier}` for single events and
//! `POST /ingest/v2/events/batch` for bulk. Both are tenant-scoped and
//! rate-limited per tenant.

use axum::{
    extract::{Path, State},
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};

use crate::contracts::ingest::{BatchIngestRequest, IngestEventRequest, IngestResponse};
use crate::error::{ApiError, AppError};
use crate::middleware::{CorrelationId, TenantId};
use crate::models::EventSource;
use crate::services::ingest::{self, IngestStatus};
use crate::state::AppState;

fn check_rate_limit(state: &AppState, tenant: &str) -> Result<(), AppError> {
    state
        .ingest_limiter
        .check(&format!("ingest:{tenant}"))
        .map_err(AppError::from)
}

/// Handler for `POST /ingest/{source}`
pub async fn ingest_event_handler(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Extension(tenant): Extension<TenantId>,
    Extension(correlation): Extension<CorrelationId>,
    body: Result<Json<IngestEventRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    let source = EventSource::parse(&source)
        .ok_or_else(|| AppError::NotFound(format!("unknown ingest source '{source}'")))
        .map_err(with_corr)?;

    check_rate_limit(&state, tenant.as_str()).map_err(with_corr)?;

    let Json(request) = body
        .map_err(|rejection| AppError::Validation(rejection.to_string()))
        .map_err(with_corr)?;

    let outcome = ingest::ingest_event(
        &state,
        tenant.as_str(),
        source,
        &request,
        Some(correlation.as_str()),
    )
    .await
    .map_err(with_corr)?;

    let response = IngestResponse {
        ok: outcome.status != IngestStatus::AcceptedWithErrors,
        status: outcome.status.http_label().to_string(),
        message: outcome.status.message().to_string(),
        event_id: Some(outcome.event_id),
        order_id: Some(outcome.order_id),
        processed_at: Some(outcome.processed_at),
        exception_created: !outcome.exception_ids.is_empty(),
        reason_code: outcome.first_reason_code.map(|c| c.as_str().to_string()),
        exception_id: outcome.exception_ids.first().copied(),
        correlation_id: Some(correlation_id),
    };

    Ok((StatusCode::OK, Json(response)))
}

/// Handler for `POST /ingest/v2/events/batch`
pub async fn ingest_batch_handler(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Extension(correlation): Extension<CorrelationId>,
    body: Result<Json<BatchIngestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    check_rate_limit(&state, tenant.as_str()).map_err(with_corr)?;

    let Json(request) = body
        .map_err(|rejection| AppError::Validation(rejection.to_string()))
        .map_err(with_corr)?;

    let response = ingest::ingest_batch(
        &state,
        tenant.as_str(),
        &request,
        Some(correlation.as_str()),
    )
    .await
    .map_err(with_corr)?;

    Ok((StatusCode::OK, Json(response)))
}
