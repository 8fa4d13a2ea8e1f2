//! Dead-letter capture
//!
//! Centralizes failure capture so every caller records the same fields the
//! replay worker and operators depend on. A failed capture is logged loudly
//! (the work item may be lost) but never panics the pipeline.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::error;

use crate::error::AppError;
use crate::metrics;
use crate::repos::dlq_repo;

/// Capture a failed work item into the DLQ.
///
/// Only call for DLQ-eligible errors (transient dependency / internal);
/// validation and business-rule failures surface to the caller instead.
pub async fn capture_failure(
    pool: &PgPool,
    tenant: &str,
    payload: &JsonValue,
    err: &AppError,
    correlation_id: Option<&str>,
    source_operation: &str,
) {
    debug_assert!(err.is_dlq_eligible());

    let stack_context = format!("{err:?}");

    match dlq_repo::push(
        pool,
        tenant,
        payload,
        err.class_name(),
        &err.to_string(),
        Some(&stack_context),
        correlation_id,
        Some(source_operation),
        dlq_repo::DEFAULT_MAX_ATTEMPTS,
    )
    .await
    {
        Ok(item) => {
            metrics::DLQ_ITEMS_TOTAL
                .with_label_values(&[tenant, err.class_name()])
                .inc();

            if let Ok(depth) = dlq_repo::pending_depth(pool, tenant).await {
                metrics::DLQ_DEPTH.with_label_values(&[tenant]).set(depth);
            }

            error!(
                dlq_id = item.id,
                tenant,
                source_operation,
                correlation_id = correlation_id.unwrap_or("none"),
                error_class = err.class_name(),
                error = %err,
                "work item moved to DLQ"
            );
        }
        Err(push_err) => {
            error!(
                tenant,
                source_operation,
                correlation_id = correlation_id.unwrap_or("none"),
                error = %err,
                dlq_error = %push_err,
                "failed to write to DLQ - work item may be lost!"
            );
        }
    }
}
