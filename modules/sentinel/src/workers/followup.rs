//! Post-ingest follow-up queue and worker
//!
//! A bounded in-memory queue buffers the asynchronous work that trails event
//! ingestion: AI classification, automated resolution, and manual-review
//! escalation. When the queue is full, producers drop the follow-up (never
//! the event), log it, and bump a counter; the replay path can regenerate
//! dropped analysis work later.

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dlq;
use crate::metrics;
use crate::models::ExceptionStatus;
use crate::repos::exception_repo;
use crate::services::exception_analyst;
use crate::services::resolution::ResolutionOutcome;
use crate::state::AppState;

/// Asynchronous work that trails ingestion
#[derive(Debug, Clone)]
pub enum FollowUpTask {
    /// AI classification of a fresh exception
    Classify { tenant: String, exception_id: i64 },
    /// Automated-resolution analysis and execution
    Resolve { tenant: String, exception_id: i64 },
    /// Manual-review escalation after the attempt budget is exhausted
    Review { tenant: String, exception_id: i64 },
}

impl FollowUpTask {
    fn kind(&self) -> &'static str {
        match self {
            FollowUpTask::Classify { .. } => "classify",
            FollowUpTask::Resolve { .. } => "resolve",
            FollowUpTask::Review { .. } => "review",
        }
    }
}

/// Clonable producer handle over the bounded queue
#[derive(Clone)]
pub struct FollowUpQueue {
    tx: mpsc::Sender<FollowUpTask>,
}

impl FollowUpQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<FollowUpTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. Returns false when the task was dropped
    /// because the queue is full.
    pub fn enqueue(&self, task: FollowUpTask) -> bool {
        let kind = task.kind();
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task = kind, "follow-up queue full, dropping task: {task:?}");
                metrics::FOLLOWUPS_DROPPED_TOTAL
                    .with_label_values(&[kind])
                    .inc();
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task = kind, "follow-up queue closed, dropping task: {task:?}");
                metrics::FOLLOWUPS_DROPPED_TOTAL
                    .with_label_values(&[kind])
                    .inc();
                false
            }
        }
    }
}

/// Start the long-lived follow-up consumer.
pub fn spawn_followup_worker(state: AppState, mut rx: mpsc::Receiver<FollowUpTask>) {
    tokio::spawn(async move {
        info!("follow-up worker started");
        while let Some(task) = rx.recv().await {
            handle_task(&state, task).await;
        }
        warn!("follow-up worker stopped (queue closed)");
    });
}

async fn handle_task(state: &AppState, task: FollowUpTask) {
    match task {
        FollowUpTask::Classify {
            tenant,
            exception_id,
        } => {
            let exception = match exception_repo::get(&state.pool, &tenant, exception_id).await {
                Ok(Some(exception)) => exception,
                Ok(None) => {
                    debug!(tenant = %tenant, exception_id, "exception vanished before classification");
                    return;
                }
                Err(e) => {
                    warn!(tenant = %tenant, exception_id, error = %e, "classification load failed");
                    return;
                }
            };

            if let Err(e) = exception_analyst::classify_or_fallback(
                &state.pool,
                &state.ai,
                &state.config,
                &exception,
            )
            .await
            {
                // Only AI_MODE=full propagates AI failures; capture the work
                // item so replay can redo the analysis.
                if e.is_dlq_eligible() {
                    dlq::capture_failure(
                        &state.pool,
                        &tenant,
                        &json!({"exception_id": exception_id}),
                        &e,
                        exception.correlation_id.as_deref(),
                        "ai_analysis",
                    )
                    .await;
                } else {
                    warn!(tenant = %tenant, exception_id, error = %e, "classification failed");
                }
            }
        }

        FollowUpTask::Resolve {
            tenant,
            exception_id,
        } => {
            match state
                .resolution
                .attempt(&state.pool, &state.ai, &tenant, exception_id)
                .await
            {
                Ok(ResolutionOutcome::Failed {
                    budget_exhausted: true,
                }) => {
                    state.followups.enqueue(FollowUpTask::Review {
                        tenant,
                        exception_id,
                    });
                }
                Ok(outcome) => {
                    debug!(tenant = %tenant, exception_id, ?outcome, "resolution pass finished");
                }
                Err(e) => {
                    warn!(tenant = %tenant, exception_id, error = %e, "resolution pass failed");
                }
            }
        }

        FollowUpTask::Review {
            tenant,
            exception_id,
        } => {
            if let Err(e) = escalate_for_review(state, &tenant, exception_id).await {
                warn!(tenant = %tenant, exception_id, error = %e, "review escalation failed");
            }
        }
    }
}

/// Bump severity one step and leave an audit trail on the ops note. Runs when
/// automated resolution has exhausted its budget.
async fn escalate_for_review(
    state: &AppState,
    tenant: &str,
    exception_id: i64,
) -> Result<(), crate::error::AppError> {
    let Some(mut exception) = exception_repo::get(&state.pool, tenant, exception_id).await? else {
        return Ok(());
    };

    if matches!(
        exception.status_enum(),
        Some(ExceptionStatus::Resolved) | Some(ExceptionStatus::Closed)
    ) {
        return Ok(());
    }

    if let Some(severity) = exception.severity_enum() {
        exception.severity = severity.escalated().as_str().to_string();
    }

    let marker = format!(
        "Escalated for manual review after {} failed automated resolution attempts.",
        exception.resolution_attempts
    );
    exception.ops_note = Some(match exception.ops_note.take() {
        Some(existing) => format!("{existing}\n{marker}"),
        None => marker,
    });

    exception_repo::save_lifecycle(&state.pool, &exception).await?;
    info!(tenant, exception_id, "exception escalated for manual review");
    Ok(())
}
