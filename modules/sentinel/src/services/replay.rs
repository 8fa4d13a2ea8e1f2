//! DLQ replay
//!
//! Drains due dead-letter items in rate-limited batches, dispatching each to
//! the handler for its source operation. Success and failure feed back into
//! the item's retry bookkeeping; items that exhaust their budget become
//! terminally FAILED.

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use resilience::TokenBucket;

use crate::contracts::admin::ReplayResponse;
use crate::contracts::ingest::IngestEventRequest;
use crate::error::AppError;
use crate::models::{DlqItem, EventSource};
use crate::repos::{dlq_repo, event_repo, exception_repo};
use crate::services::{exception_analyst, ingest};
use crate::state::AppState;

pub const DEFAULT_REPLAY_RATE_PER_SECOND: u32 = 5;

/// Replay up to `limit` due items, optionally filtered by tenant.
pub async fn replay_batch(
    state: &AppState,
    limit: i64,
    tenant: Option<&str>,
    rate_per_second: u32,
) -> Result<ReplayResponse, AppError> {
    let items = dlq_repo::fetch_due(&state.pool, limit, tenant).await?;
    if items.is_empty() {
        return Ok(ReplayResponse {
            fetched: 0,
            succeeded: 0,
            failed: 0,
        });
    }

    let bucket = TokenBucket::new(rate_per_second.max(1), f64::from(rate_per_second.max(1)));
    let fetched = items.len();
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for item in items {
        bucket.acquire().await;

        match replay_item(state, &item).await {
            Ok(()) => {
                dlq_repo::mark_attempt(&state.pool, &item, true, None).await?;
                succeeded += 1;
            }
            Err(e) => {
                warn!(dlq_id = item.id, error = %e, "replay attempt failed");
                dlq_repo::mark_attempt(&state.pool, &item, false, Some(&e.to_string())).await?;
                failed += 1;
            }
        }
    }

    info!(fetched, succeeded, failed, "dlq replay batch finished");
    Ok(ReplayResponse {
        fetched,
        succeeded,
        failed,
    })
}

async fn replay_item(state: &AppState, item: &DlqItem) -> Result<(), AppError> {
    match item.source_operation.as_deref() {
        Some("ingest_event") => replay_ingest_event(state, item).await,
        Some("ai_analysis") => replay_ai_analysis(state, item).await,
        Some("sla_evaluation") => replay_sla_evaluation(state, item).await,
        other => Err(AppError::Internal(format!(
            "unknown source operation: {}",
            other.unwrap_or("none")
        ))),
    }
}

/// Re-run a failed ingestion from the verbatim payload. The event insert is
/// conflict-tolerant, so replaying an event that made it into the store
/// before the original failure is harmless.
async fn replay_ingest_event(state: &AppState, item: &DlqItem) -> Result<(), AppError> {
    let request: IngestEventRequest = serde_json::from_value(item.payload.clone())
        .map_err(|e| AppError::Validation(format!("dlq payload is not an event: {e}")))?;

    let source = request
        .source
        .as_deref()
        .and_then(EventSource::parse)
        .ok_or_else(|| AppError::Validation("dlq payload missing source".to_string()))?;

    let event = request.validate(source)?;

    event_repo::insert_event(&state.pool, &item.tenant, &event, item.correlation_id.as_deref())
        .await?;

    let analyze_payload =
        (source == EventSource::Shopify && event.event_type == "order_paid").then_some(&event.raw);

    ingest::post_ingest(
        state,
        &item.tenant,
        &event.order_id,
        analyze_payload,
        item.correlation_id.as_deref(),
    )
    .await?;

    if let Err(e) = state
        .idempotency
        .mark_processed(&item.tenant, source.as_str(), &event.event_id)
        .await
    {
        warn!(dlq_id = item.id, error = %e, "replay could not mark event processed");
    }

    Ok(())
}

/// Re-run AI classification for the referenced exception.
async fn replay_ai_analysis(state: &AppState, item: &DlqItem) -> Result<(), AppError> {
    let exception_id = item
        .payload
        .get("exception_id")
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| AppError::Validation("dlq payload missing exception_id".to_string()))?;

    let exception = exception_repo::get(&state.pool, &item.tenant, exception_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("exception {exception_id}")))?;

    exception_analyst::classify_or_fallback(&state.pool, &state.ai, &state.config, &exception).await
}

/// Re-run SLA evaluation for the referenced order.
async fn replay_sla_evaluation(state: &AppState, item: &DlqItem) -> Result<(), AppError> {
    let order_id = item
        .payload
        .get("order_id")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| AppError::Validation("dlq payload missing order_id".to_string()))?;

    ingest::post_ingest(
        state,
        &item.tenant,
        order_id,
        None,
        item.correlation_id.as_deref(),
    )
    .await?;

    Ok(())
}
