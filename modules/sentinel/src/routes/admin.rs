//! Admin endpoints
//!
//! Operator tooling behind the admin JWT: DLQ replay and maintenance, AI
//! policy linting, cache invalidation, and the detailed system-health view.

use axum::{
    extract::{Query, State},
    extract::rejection::JsonRejection,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::contracts::admin::{
    CacheClearResponse, DlqCleanupQuery, LintPolicyRequest, ReplayRequest,
};
use crate::error::{ApiError, AppError};
use crate::middleware::CorrelationId;
use crate::repos::dlq_repo;
use crate::services::replay::{self, DEFAULT_REPLAY_RATE_PER_SECOND};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TenantFilterQuery {
    pub tenant: Option<String>,
}

/// Handler for `POST /admin/replay`
pub async fn replay_dlq(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    body: Result<Json<ReplayRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    let Json(request) = body
        .map_err(|rejection| AppError::Validation(rejection.to_string()))
        .map_err(with_corr)?;

    if !(1..=500).contains(&request.limit) {
        return Err(with_corr(AppError::Validation(
            "limit must be in [1, 500]".to_string(),
        )));
    }

    let response = replay::replay_batch(
        &state,
        request.limit,
        request.tenant.as_deref(),
        DEFAULT_REPLAY_RATE_PER_SECOND,
    )
    .await
    .map_err(with_corr)?;

    Ok(Json(response))
}

/// Handler for `GET /admin/dlq/stats`
pub async fn dlq_stats(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<TenantFilterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = dlq_repo::stats(&state.pool, query.tenant.as_deref())
        .await
        .map_err(AppError::from)
        .map_err(|e| e.with_correlation(correlation.as_str().to_string()))?;

    Ok(Json(stats))
}

/// Handler for `POST /admin/dlq/cleanup?days_old=N`
pub async fn dlq_cleanup(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<DlqCleanupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    if query.days_old < 1 {
        return Err(with_corr(AppError::Validation(
            "days_old must be >= 1".to_string(),
        )));
    }

    let removed = dlq_repo::cleanup(&state.pool, query.days_old, None)
        .await
        .map_err(AppError::from)
        .map_err(with_corr)?;

    Ok(Json(json!({"removed": removed, "days_old": query.days_old})))
}

/// Handler for `POST /admin/ai/lint-policy`
pub async fn lint_policy(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    body: Result<Json<LintPolicyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let correlation_id = correlation.as_str().to_string();
    let with_corr = |e: AppError| e.with_correlation(correlation_id.clone());

    let Json(request) = body
        .map_err(|rejection| AppError::Validation(rejection.to_string()))
        .map_err(with_corr)?;

    if request.policy_text.trim().is_empty() {
        return Err(with_corr(AppError::Validation(
            "policy_text must not be empty".to_string(),
        )));
    }

    let report = state
        .ai
        .lint_policy(&request.policy_text, &request.policy_type)
        .await
        .map_err(|e| AppError::Dependency(format!("policy lint: {e}")))
        .map_err(with_corr)?;

    Ok(Json(report))
}

/// Handler for `POST /admin/cache/clear`
pub async fn clear_caches(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    state.policies.clear();
    state.prompts.clear();
    state.ai.clear_cache();

    Ok(Json(CacheClearResponse {
        cleared: vec![
            "policy_cache".to_string(),
            "prompt_cache".to_string(),
            "ai_response_cache".to_string(),
        ],
    }))
}

/// Handler for `GET /admin/system/health`
pub async fn system_health(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let system = state.health.system_health(true).await;
    let breakers = resilience::registry::snapshots().await;
    let tokens_used = state.ai.tokens_used_today().await;

    Ok(Json(json!({
        "overall_healthy": system.overall_healthy,
        "services": system.services,
        "circuit_breakers": breakers,
        "ai": {
            "enabled": state.ai.is_enabled(),
            "mode": state.config.ai_mode.as_str(),
            "tokens_used_today": tokens_used,
            "daily_token_budget": state.config.ai_max_daily_tokens,
        },
    })))
}
