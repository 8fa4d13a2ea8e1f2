//! Exception management endpoints
//!
//! Listing, detail, operator updates, and the stats summary. Everything is
//! tenant-scoped; an id belonging to another tenant reads as 404 so callers
//! cannot probe for existence.

use axum::{
    extract::{Path, Query, State},
    extract::rejection::JsonRejection,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;

use crate::contracts::exceptions_api::{
    ExceptionListQuery, ExceptionListResponse, ExceptionResponse, ExceptionUpdateRequest,
};
use crate::error::{ApiError, AppError};
use crate::middleware::{CorrelationId, TenantId};
use crate::models::{ExceptionSeverity, ExceptionStatus};
use crate::repos::exception_repo;
use crate::state::AppState;

/// Handler for `GET /exceptions`
pub async fn list_exceptions(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<ExceptionListQuery>,
) -> Result<Json<ExceptionListResponse>, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    let filters = query.validate().map_err(with_corr)?;
    let (items, total) = exception_repo::list(&state.pool, tenant.as_str(), &filters)
        .await
        .map_err(AppError::from)
        .map_err(with_corr)?;

    Ok(Json(ExceptionListResponse {
        items: items.into_iter().map(ExceptionResponse::from).collect(),
        total,
        page: filters.page,
        page_size: filters.page_size,
    }))
}

/// Handler for `GET /exceptions/{id}`
pub async fn get_exception(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<i64>,
) -> Result<Json<ExceptionResponse>, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    let record = exception_repo::get(&state.pool, tenant.as_str(), id)
        .await
        .map_err(AppError::from)
        .map_err(with_corr)?
        .ok_or_else(|| AppError::NotFound(format!("exception {id}")))
        .map_err(with_corr)?;

    Ok(Json(ExceptionResponse::from(record)))
}

/// Handler for `PATCH /exceptions/{id}`
///
/// Operator updates: status transitions (validated against the lifecycle
/// state machine), severity, ops note, and manual resolution-tracking reset.
pub async fn update_exception(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Extension(correlation): Extension<CorrelationId>,
    Path(id): Path<i64>,
    body: Result<Json<ExceptionUpdateRequest>, JsonRejection>,
) -> Result<Json<ExceptionResponse>, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    let Json(update) = body
        .map_err(|rejection| AppError::Validation(rejection.to_string()))
        .map_err(with_corr)?;

    let mut record = exception_repo::get(&state.pool, tenant.as_str(), id)
        .await
        .map_err(AppError::from)
        .map_err(with_corr)?
        .ok_or_else(|| AppError::NotFound(format!("exception {id}")))
        .map_err(with_corr)?;

    if let Some(raw_status) = &update.status {
        let target = ExceptionStatus::parse(raw_status)
            .ok_or_else(|| AppError::Validation(format!("unknown status '{raw_status}'")))
            .map_err(with_corr)?;

        let current = record
            .status_enum()
            .ok_or_else(|| AppError::Internal(format!("stored status '{}' unknown", record.status)))
            .map_err(with_corr)?;

        if !current.can_transition_to(target) {
            return Err(with_corr(AppError::Conflict(format!(
                "illegal status transition {current} -> {target}"
            ))));
        }

        exception_repo::apply_status_change(&mut record, target, Utc::now());
    }

    if let Some(raw_severity) = &update.severity {
        let severity = ExceptionSeverity::parse(raw_severity)
            .ok_or_else(|| AppError::Validation(format!("unknown severity '{raw_severity}'")))
            .map_err(with_corr)?;
        record.severity = severity.as_str().to_string();
    }

    if let Some(ops_note) = &update.ops_note {
        record.ops_note = Some(ops_note.clone());
    }

    if update.reset_resolution_tracking {
        record.reset_resolution_tracking();
    }

    let saved = exception_repo::save_lifecycle(&state.pool, &record)
        .await
        .map_err(AppError::from)
        .map_err(with_corr)?;

    Ok(Json(ExceptionResponse::from(saved)))
}

/// Handler for `GET /exceptions/stats/summary`
pub async fn stats_summary(
    State(state): State<AppState>,
    Extension(tenant): Extension<TenantId>,
    Extension(correlation): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = exception_repo::stats(&state.pool, tenant.as_str())
        .await
        .map_err(AppError::from)
        .map_err(|e| e.with_correlation(correlation.as_str().to_string()))?;

    Ok(Json(summary))
}
