//! Ingestion orchestrator
//!
//! Entry point of the pipeline: validates events, enforces idempotency,
//! persists to the event store, runs the order analyzer and the SLA engine,
//! materializes exceptions, and enqueues AI/resolution follow-ups.
//!
//! Failure rules: schema errors surface immediately and touch nothing.
//! Transient dependency failures are retried; once retries are exhausted the
//! original payload is captured into the DLQ and the caller sees
//! `accepted_with_errors`. After the event row is persisted, no later
//! failure can lose the event: replay re-derives everything from it.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use resilience::{retry_with_backoff, RetryConfig};

use crate::contracts::ingest::{BatchIngestRequest, BatchIngestResponse, IngestEventRequest};
use crate::dlq;
use crate::error::AppError;
use crate::metrics;
use crate::models::{EventSource, ExceptionSeverity};
use crate::reason_codes::ReasonCode;
use crate::repos::{event_repo, exception_repo};
use crate::services::{order_analyzer, sla_engine};
use crate::state::AppState;
use crate::workers::followup::FollowUpTask;

const BATCH_WORKER_CONCURRENCY: usize = 8;

/// Outcome of a single-event ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Processed,
    Duplicate,
    /// Another worker holds the processing lock for this event right now
    DuplicateInFlight,
    /// The event (or its follow-up work) was captured into the DLQ
    AcceptedWithErrors,
}

impl IngestStatus {
    /// Status vocabulary of the HTTP contract. The in-flight case reports as
    /// a duplicate; the distinction stays in the response message and logs.
    pub fn http_label(&self) -> &'static str {
        match self {
            IngestStatus::Processed => "processed",
            IngestStatus::Duplicate | IngestStatus::DuplicateInFlight => "duplicate",
            IngestStatus::AcceptedWithErrors => "accepted_with_errors",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            IngestStatus::Processed => "Event processed successfully",
            IngestStatus::Duplicate => "Event already processed",
            IngestStatus::DuplicateInFlight => "Event is currently being processed",
            IngestStatus::AcceptedWithErrors => {
                "Event accepted; processing deferred to the dead-letter queue"
            }
        }
    }
}

/// Result of `ingest_event`
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub event_id: String,
    pub order_id: String,
    pub processed_at: DateTime<Utc>,
    pub exception_ids: Vec<i64>,
    pub first_reason_code: Option<ReasonCode>,
}

fn dependency_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: StdDuration::from_millis(100),
        max_backoff: StdDuration::from_secs(1),
        full_jitter: true,
    }
}

/// Ingest one event end to end.
pub async fn ingest_event(
    state: &AppState,
    tenant: &str,
    source: EventSource,
    request: &IngestEventRequest,
    correlation_id: Option<&str>,
) -> Result<IngestOutcome, AppError> {
    // Step 1: schema validation. Failures surface as 422 with no side
    // effects, never the DLQ.
    let event = request.validate(source)?;

    let outcome = |status: IngestStatus, exception_ids: Vec<i64>, first: Option<ReasonCode>| {
        IngestOutcome {
            status,
            event_id: event.event_id.clone(),
            order_id: event.order_id.clone(),
            processed_at: Utc::now(),
            exception_ids,
            first_reason_code: first,
        }
    };

    let retry = dependency_retry();

    // Step 2: idempotency lock + processed-marker.
    let lock_acquired = match retry_with_backoff(
        || state.idempotency.acquire_lock(tenant, source.as_str(), &event.event_id),
        &retry,
        "idempotency_acquire_lock",
        AppError::is_retryable,
    )
    .await
    {
        Ok(acquired) => acquired,
        Err(e) if e.is_dlq_eligible() => {
            dlq::capture_failure(&state.pool, tenant, &event.raw, &e, correlation_id, "ingest_event")
                .await;
            metrics::EVENTS_INGESTED_TOTAL
                .with_label_values(&[tenant, source.as_str(), "accepted_with_errors"])
                .inc();
            return Ok(outcome(IngestStatus::AcceptedWithErrors, Vec::new(), None));
        }
        Err(e) => return Err(e),
    };

    if !lock_acquired {
        metrics::EVENTS_INGESTED_TOTAL
            .with_label_values(&[tenant, source.as_str(), "duplicate"])
            .inc();
        return Ok(outcome(IngestStatus::DuplicateInFlight, Vec::new(), None));
    }

    let result = ingest_locked(state, tenant, source, &event, correlation_id, &retry).await;

    // The lock carries a 5s TTL, but releasing promptly keeps genuine
    // concurrent retries snappy.
    if let Err(e) = state
        .idempotency
        .release_lock(tenant, source.as_str(), &event.event_id)
        .await
    {
        debug!(error = %e, "idempotency lock release failed (will expire)");
    }

    let result = result.map(|(status, ids, first)| outcome(status, ids, first));
    if let Ok(o) = &result {
        metrics::EVENTS_INGESTED_TOTAL
            .with_label_values(&[tenant, source.as_str(), o.status.http_label()])
            .inc();
    }
    result
}

async fn ingest_locked(
    state: &AppState,
    tenant: &str,
    source: EventSource,
    event: &crate::contracts::ingest::ValidatedEvent,
    correlation_id: Option<&str>,
    retry: &RetryConfig,
) -> Result<(IngestStatus, Vec<i64>, Option<ReasonCode>), AppError> {
    let already = match retry_with_backoff(
        || state.idempotency.is_processed(tenant, source.as_str(), &event.event_id),
        retry,
        "idempotency_is_processed",
        AppError::is_retryable,
    )
    .await
    {
        Ok(already) => already,
        Err(e) if e.is_dlq_eligible() => {
            dlq::capture_failure(&state.pool, tenant, &event.raw, &e, correlation_id, "ingest_event")
                .await;
            return Ok((IngestStatus::AcceptedWithErrors, Vec::new(), None));
        }
        Err(e) => return Err(e),
    };

    if already {
        return Ok((IngestStatus::Duplicate, Vec::new(), None));
    }

    // Step 3: persist. The unique index is the source of truth for
    // duplicates; a suppressed insert marks the event processed and reports
    // `duplicate`.
    let inserted = match retry_with_backoff(
        || async {
            event_repo::insert_event(&state.pool, tenant, event, correlation_id)
                .await
                .map_err(AppError::from)
        },
        retry,
        "event_store_insert",
        AppError::is_retryable,
    )
    .await
    {
        Ok(row) => row,
        Err(e) if e.is_dlq_eligible() => {
            dlq::capture_failure(&state.pool, tenant, &event.raw, &e, correlation_id, "ingest_event")
                .await;
            return Ok((IngestStatus::AcceptedWithErrors, Vec::new(), None));
        }
        Err(e) => return Err(e),
    };

    if inserted.is_none() {
        mark_processed_best_effort(state, tenant, source, &event.event_id).await;
        return Ok((IngestStatus::Duplicate, Vec::new(), None));
    }

    // Steps 4-7: analyzers, SLA, exception upserts, follow-up fan-out. The
    // event row is durable; failures here defer the derivation work to the
    // DLQ instead of failing the request.
    let analyze_payload =
        (source == EventSource::Shopify && event.event_type == "order_paid").then_some(&event.raw);

    let created = match post_ingest(
        state,
        tenant,
        &event.order_id,
        analyze_payload,
        correlation_id,
    )
    .await
    {
        Ok(created) => created,
        Err(e) if e.is_dlq_eligible() => {
            dlq::capture_failure(&state.pool, tenant, &event.raw, &e, correlation_id, "ingest_event")
                .await;
            return Ok((IngestStatus::AcceptedWithErrors, Vec::new(), None));
        }
        Err(e) => return Err(e),
    };

    // Step 8: mark processed.
    mark_processed_best_effort(state, tenant, source, &event.event_id).await;

    let first = created.first().map(|(_, code)| *code);
    let ids = created.into_iter().map(|(id, _)| id).collect();
    Ok((IngestStatus::Processed, ids, first))
}

async fn mark_processed_best_effort(
    state: &AppState,
    tenant: &str,
    source: EventSource,
    event_id: &str,
) {
    if let Err(e) = state
        .idempotency
        .mark_processed(tenant, source.as_str(), event_id)
        .await
    {
        // The database constraint still suppresses duplicates; the marker is
        // an optimization.
        warn!(tenant, event_id, error = %e, "failed to mark event processed");
    }
}

/// Steps 4-7 for one order: detect problems and breaches, upsert exceptions,
/// enqueue follow-ups. Shared by single ingest, batch fan-out, and replay.
pub(crate) async fn post_ingest(
    state: &AppState,
    tenant: &str,
    order_id: &str,
    analyze_payload: Option<&JsonValue>,
    correlation_id: Option<&str>,
) -> Result<Vec<(i64, ReasonCode)>, AppError> {
    let mut descriptors: Vec<(ReasonCode, ExceptionSeverity, JsonValue)> = Vec::new();

    // Step 4: the order analyzer inspects storefront order documents.
    if let Some(payload) = analyze_payload {
        for problem in order_analyzer::analyze_order(&state.ai, payload).await {
            let mut context = problem.context.clone();
            if let Some(obj) = context.as_object_mut() {
                obj.insert("description".to_string(), json!(problem.description));
            }
            descriptors.push((problem.reason_code, problem.severity, context));
        }
    }

    // Step 5: SLA evaluation over the full order timeline.
    let events = event_repo::list_order_timeline(&state.pool, tenant, order_id).await?;
    let policy = state.policies.sla_policy(&state.pool, tenant).await?;
    let hourly = event_repo::rolling_hourly_order_count(&state.pool, tenant).await?;

    for breach in sla_engine::evaluate(&events, &policy, Utc::now(), hourly) {
        descriptors.push((
            breach.reason_code,
            breach.reason_code.config().severity,
            breach.context_data(),
        ));
    }

    // Step 6: upsert one open exception per reason code.
    let mut created = Vec::with_capacity(descriptors.len());
    for (reason_code, severity, context) in descriptors {
        let (record, was_created) = exception_repo::upsert_open(
            &state.pool,
            tenant,
            order_id,
            reason_code,
            severity,
            &context,
            correlation_id,
            state.config.max_resolution_attempts,
        )
        .await?;

        if was_created {
            metrics::EXCEPTIONS_CREATED_TOTAL
                .with_label_values(&[tenant, reason_code.as_str()])
                .inc();
        }

        // Step 7: asynchronous AI classification; resolution analysis for
        // auto-resolvable reason codes.
        state.followups.enqueue(FollowUpTask::Classify {
            tenant: tenant.to_string(),
            exception_id: record.id,
        });
        if reason_code.config().auto_resolve {
            state.followups.enqueue(FollowUpTask::Resolve {
                tenant: tenant.to_string(),
                exception_id: record.id,
            });
        }

        created.push((record.id, reason_code));
    }

    Ok(created)
}

/// Bulk ingestion: validate everything, de-duplicate within the batch,
/// insert in one transaction, then fan out per-order processing bounded by a
/// worker pool.
pub async fn ingest_batch(
    state: &AppState,
    tenant: &str,
    request: &BatchIngestRequest,
    correlation_id: Option<&str>,
) -> Result<BatchIngestResponse, AppError> {
    let started = std::time::Instant::now();

    if request.events.is_empty() {
        return Err(AppError::Validation("events must not be empty".to_string()));
    }

    // Validate every item before any side effect.
    let mut validated = Vec::with_capacity(request.events.len());
    let mut problems = Vec::new();
    for (index, item) in request.events.iter().enumerate() {
        let source = item
            .source
            .as_deref()
            .and_then(EventSource::parse);
        match source {
            Some(source) => match item.validate(source) {
                Ok(event) => validated.push(event),
                Err(e) => problems.push(format!("events[{index}]: {e}")),
            },
            None => problems.push(format!(
                "events[{index}]: source must be one of shopify|wms|carrier"
            )),
        }
    }
    if !problems.is_empty() {
        return Err(AppError::Validation(problems.join("; ")));
    }

    // De-duplicate within the batch on (source, event_id), keeping the first.
    let mut seen = std::collections::HashSet::new();
    validated.retain(|event| seen.insert((event.source, event.event_id.clone())));

    // Single transaction, single commit; conflicts with already-stored
    // events are silently skipped.
    let inserted = {
        let mut tx = state.pool.begin().await?;
        let inserted =
            event_repo::insert_events_bulk(&mut tx, tenant, &validated, correlation_id).await;
        match inserted {
            Ok(inserted) => {
                tx.commit().await?;
                inserted
            }
            Err(e) => {
                tx.rollback().await.ok();
                let app_err = AppError::from(e);
                for event in &validated {
                    dlq::capture_failure(
                        &state.pool,
                        tenant,
                        &event.raw,
                        &app_err,
                        correlation_id,
                        "ingest_event",
                    )
                    .await;
                }
                return Ok(BatchIngestResponse {
                    processed_count: 0,
                    event_ids: Vec::new(),
                    status: "accepted_with_errors".to_string(),
                    message: "batch insert failed; events deferred to the dead-letter queue"
                        .to_string(),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                });
            }
        }
    };

    for event in &validated {
        mark_processed_best_effort(state, tenant, event.source, &event.event_id).await;
    }

    // Group by order and fan out steps 4-7 under a bounded worker pool.
    let mut orders: std::collections::BTreeMap<String, Option<JsonValue>> =
        std::collections::BTreeMap::new();
    for event in &validated {
        let entry = orders.entry(event.order_id.clone()).or_insert(None);
        if event.source == EventSource::Shopify && event.event_type == "order_paid" {
            *entry = Some(event.raw.clone());
        }
    }

    let semaphore = std::sync::Arc::new(Semaphore::new(BATCH_WORKER_CONCURRENCY));
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut item_failures = 0usize;

    for (order_id, analyze_payload) in orders {
        let permit = semaphore.clone().acquire_owned().await.map_err(|_| {
            AppError::Internal("batch worker pool closed".to_string())
        })?;
        let state = state.clone();
        let tenant = tenant.to_string();
        let correlation_id = correlation_id.map(str::to_string);

        tasks.spawn(async move {
            let _permit = permit;
            let result = post_ingest(
                &state,
                &tenant,
                &order_id,
                analyze_payload.as_ref(),
                correlation_id.as_deref(),
            )
            .await;

            if let Err(e) = result {
                if e.is_dlq_eligible() {
                    dlq::capture_failure(
                        &state.pool,
                        &tenant,
                        &json!({"order_id": order_id}),
                        &e,
                        correlation_id.as_deref(),
                        "sla_evaluation",
                    )
                    .await;
                } else {
                    warn!(tenant = %tenant, order_id = %order_id, error = %e, "batch post-ingest failed");
                }
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if joined.is_err() {
            item_failures += 1;
        }
    }

    let status = if item_failures == 0 {
        "completed"
    } else {
        "completed_with_errors"
    };

    Ok(BatchIngestResponse {
        processed_count: inserted.len(),
        event_ids: inserted,
        status: status.to_string(),
        message: format!(
            "batch ingested {} events across the batch",
            validated.len()
        ),
        processing_time_ms: started.elapsed().as_millis() as u64,
    })
}
