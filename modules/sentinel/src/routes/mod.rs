//! Router assembly
//!
//! Three route groups with different guard stacks:
//!
//! - exempt: health, readiness, metrics. No tenant header required
//! - tenant: ingestion and exception management. `X-Tenant-Id` mandatory
//! - admin: operator tooling. Tenant header plus admin bearer token
//!
//! Correlation-id handling wraps everything so every response, including
//! errors from the guards themselves, carries `X-Correlation-Id`.

pub mod admin;
pub mod exceptions;
pub mod health;
pub mod ingest;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::correlation::correlation_id_middleware;
use crate::middleware::tenancy::require_tenant_middleware;
use crate::security::auth::require_admin_middleware;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let exempt_routes = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/health", get(health::detailed_health))
        .route("/api/health/{service}", get(health::service_health))
        .route("/metrics", get(health::metrics_handler));

    let tenant_routes = Router::new()
        .route("/ingest/{source}", post(ingest::ingest_event_handler))
        .route("/ingest/v2/events/batch", post(ingest::ingest_batch_handler))
        .route("/exceptions", get(exceptions::list_exceptions))
        .route("/exceptions/stats/summary", get(exceptions::stats_summary))
        .route(
            "/exceptions/{id}",
            get(exceptions::get_exception).patch(exceptions::update_exception),
        )
        .layer(middleware::from_fn(require_tenant_middleware));

    let admin_routes = Router::new()
        .route("/admin/replay", post(admin::replay_dlq))
        .route("/admin/dlq/stats", get(admin::dlq_stats))
        .route("/admin/dlq/cleanup", post(admin::dlq_cleanup))
        .route("/admin/ai/lint-policy", post(admin::lint_policy))
        .route("/admin/cache/clear", post(admin::clear_caches))
        .route("/admin/system/health", get(admin::system_health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_middleware,
        ))
        .layer(middleware::from_fn(require_tenant_middleware));

    Router::new()
        .merge(exempt_routes)
        .merge(tenant_routes)
        .merge(admin_routes)
        .layer(middleware::from_fn(correlation_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(state.config.max_request_body_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}
