//! Automated resolution engine
//!
//! Consults the AI adapter on whether an exception can be fixed without a
//! human, and executes the suggested actions under the per-exception attempt
//! budget. The adapter sees raw order data only, with no pre-computed flags
//! or hints, so its judgment is genuine rather than an echo of ours.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Map, Value as JsonValue};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::ai::AiClient;
use crate::contracts::ai::{AutomatedAction, ResolutionAnalysis};
use crate::error::AppError;
use crate::metrics;
use crate::models::{ExceptionRecord, ExceptionStatus};
use crate::reason_codes::ReasonCode;
use crate::repos::{event_repo, exception_repo};

/// Gates from the resolution policy
pub const MIN_DECISION_CONFIDENCE: f64 = 0.7;
pub const MIN_SUCCESS_PROBABILITY: f64 = 0.6;
pub const DEFAULT_LOW_CONFIDENCE_BLOCK: f64 = 0.3;

pub const LOW_CONFIDENCE_BLOCK_REASON: &str =
    "AI confidence too low for automated resolution";

/// Executes one automated action against the owning external system.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn run(
        &self,
        action: AutomatedAction,
        exception: &ExceptionRecord,
    ) -> Result<bool, AppError>;
}

/// Stand-in for the external action services, with per-action success rates
/// observed from the real integrations.
pub struct SimulatedActionRunner;

impl SimulatedActionRunner {
    fn success_rate(action: AutomatedAction) -> f64 {
        match action {
            AutomatedAction::AddressValidation => 0.7,
            AutomatedAction::PaymentRetry => 0.4,
            AutomatedAction::InventoryReallocation => 0.6,
            AutomatedAction::SystemRecovery => 0.8,
            AutomatedAction::CarrierApiUpdate => 0.5,
        }
    }
}

#[async_trait]
impl ActionRunner for SimulatedActionRunner {
    async fn run(
        &self,
        action: AutomatedAction,
        exception: &ExceptionRecord,
    ) -> Result<bool, AppError> {
        let success = rand::thread_rng().gen_bool(Self::success_rate(action));
        info!(
            exception_id = exception.id,
            action = %action,
            success,
            "automated action executed"
        );
        Ok(success)
    }
}

/// A runner with a fixed outcome. Test- and drill-only.
pub struct FixedOutcomeRunner(pub bool);

#[async_trait]
impl ActionRunner for FixedOutcomeRunner {
    async fn run(
        &self,
        _action: AutomatedAction,
        _exception: &ExceptionRecord,
    ) -> Result<bool, AppError> {
        Ok(self.0)
    }
}

/// What the engine decided to do with one exception
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Execute these actions now
    Attempt(Vec<AutomatedAction>),
    /// Block the exception from further automated attempts
    Block(String),
    /// Leave the exception alone
    Skip(String),
}

/// Outcome of a resolution pass
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    Resolved,
    /// Attempt ran and failed; `budget_exhausted` means the exception is now
    /// blocked and needs a human review
    Failed { budget_exhausted: bool },
    Skipped(String),
    Blocked(String),
}

/// Pure decision gate over an AI (or fallback) analysis.
pub fn decide(
    analysis: &ResolutionAnalysis,
    exception: &ExceptionRecord,
    low_confidence_block: f64,
) -> Decision {
    if !exception.is_resolution_eligible() {
        return Decision::Skip("exception is not resolution-eligible".to_string());
    }

    if analysis.confidence < low_confidence_block {
        return Decision::Block(LOW_CONFIDENCE_BLOCK_REASON.to_string());
    }

    if analysis.can_auto_resolve
        && analysis.confidence >= MIN_DECISION_CONFIDENCE
        && analysis.success_probability >= MIN_SUCCESS_PROBABILITY
        && !analysis.automated_actions.is_empty()
    {
        Decision::Attempt(analysis.automated_actions.clone())
    } else {
        Decision::Skip(format!(
            "below execution gate (can_auto_resolve={}, confidence={:.2}, success_probability={:.2})",
            analysis.can_auto_resolve, analysis.confidence, analysis.success_probability
        ))
    }
}

/// Deterministic analysis used when the AI adapter is unavailable.
pub fn fallback_analysis(reason_code: ReasonCode) -> ResolutionAnalysis {
    let (can_auto_resolve, confidence, actions, success_probability) = match reason_code {
        ReasonCode::AddressInvalid => {
            (true, 0.6, vec![AutomatedAction::AddressValidation], 0.7)
        }
        ReasonCode::PaymentFailed => (true, 0.5, vec![AutomatedAction::PaymentRetry], 0.4),
        ReasonCode::SystemError => (true, 0.4, vec![AutomatedAction::SystemRecovery], 0.6),
        _ => (false, 0.0, Vec::new(), 0.0),
    };

    ResolutionAnalysis {
        can_auto_resolve,
        confidence,
        automated_actions: actions,
        success_probability,
        resolution_strategy: Some(format!("Fallback rule for {reason_code}")),
        reasoning: Some(format!(
            "Fallback analysis - AI unavailable, using basic rule for {reason_code}"
        )),
        fallback_used: true,
    }
}

/// Raw, unenriched context for the AI: the order's event stream plus raw
/// fields surfaced from event payloads. Nothing computed, nothing hinted.
pub async fn build_raw_context(
    pool: &PgPool,
    exception: &ExceptionRecord,
) -> Result<JsonValue, AppError> {
    let events = event_repo::list_order_timeline(pool, &exception.tenant, &exception.order_id)
        .await?;
    Ok(raw_context_from_events(exception, &events))
}

/// The context assembly itself, kept free of I/O. The keys here come
/// straight from stored data; nothing is derived, flagged, or hinted.
pub fn raw_context_from_events(
    exception: &ExceptionRecord,
    events: &[crate::models::OrderEvent],
) -> JsonValue {
    let raw_events: Vec<JsonValue> = events
        .iter()
        .map(|event| {
            json!({
                "event_type": event.event_type,
                "occurred_at": event.occurred_at,
                "source": event.source,
                "event_data": event.payload,
            })
        })
        .collect();

    let mut context = Map::new();
    context.insert("exception_id".to_string(), json!(exception.id));
    context.insert("order_id".to_string(), json!(exception.order_id));
    context.insert("reason_code".to_string(), json!(exception.reason_code));
    context.insert("created_at".to_string(), json!(exception.created_at));
    context.insert("status".to_string(), json!(exception.status));
    context.insert("warehouse_events".to_string(), JsonValue::Array(raw_events));

    // Surface raw order fields without interpretation.
    const RAW_FIELDS: &[&str] = &[
        "financial_status",
        "payment_gateway_response",
        "shipping_address",
        "line_items",
        "inventory_snapshot",
        "carrier_events",
        "system_logs",
    ];
    for event in events {
        for field in RAW_FIELDS {
            if let Some(value) = event.payload.get(*field) {
                context.entry(field.to_string()).or_insert(value.clone());
            }
        }
    }

    JsonValue::Object(context)
}

/// The resolution engine proper
pub struct ResolutionEngine {
    runner: Arc<dyn ActionRunner>,
    low_confidence_block: f64,
}

impl ResolutionEngine {
    pub fn new(runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            runner,
            low_confidence_block: DEFAULT_LOW_CONFIDENCE_BLOCK,
        }
    }

    pub fn with_low_confidence_block(mut self, threshold: f64) -> Self {
        self.low_confidence_block = threshold;
        self
    }

    /// Analyze and, when the gates pass, execute an automated resolution
    /// attempt for `exception_id`.
    pub async fn attempt(
        &self,
        pool: &PgPool,
        ai: &AiClient,
        tenant: &str,
        exception_id: i64,
    ) -> Result<ResolutionOutcome, AppError> {
        let Some(mut exception) = exception_repo::get(pool, tenant, exception_id).await? else {
            return Err(AppError::NotFound(format!("exception {exception_id}")));
        };

        if !exception.is_resolution_eligible() {
            return Ok(ResolutionOutcome::Skipped(
                "exception is not resolution-eligible".to_string(),
            ));
        }

        let raw_context = build_raw_context(pool, &exception).await?;

        let analysis = match ai
            .analyze_automated_resolution(&raw_context, &exception.reason_code)
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(exception_id, error = %e, "resolution analysis unavailable, using fallback");
                metrics::AI_FALLBACK_TOTAL
                    .with_label_values(&["automated_resolution"])
                    .inc();
                fallback_analysis(exception.reason_code_enum())
            }
        };

        match decide(&analysis, &exception, self.low_confidence_block) {
            Decision::Skip(reason) => Ok(ResolutionOutcome::Skipped(reason)),
            Decision::Block(reason) => {
                exception.block_resolution(reason.clone());
                exception_repo::save_lifecycle(pool, &exception).await?;
                Ok(ResolutionOutcome::Blocked(reason))
            }
            Decision::Attempt(actions) => {
                self.execute(pool, tenant, &mut exception, &actions).await
            }
        }
    }

    async fn execute(
        &self,
        pool: &PgPool,
        tenant: &str,
        exception: &mut ExceptionRecord,
        actions: &[AutomatedAction],
    ) -> Result<ResolutionOutcome, AppError> {
        let now = Utc::now();

        // The attempt begins: OPEN/ACKNOWLEDGED move to IN_PROGRESS, and the
        // attempt counter burns one unit of budget.
        if matches!(
            exception.status_enum(),
            Some(ExceptionStatus::Open) | Some(ExceptionStatus::Acknowledged)
        ) {
            exception_repo::apply_status_change(exception, ExceptionStatus::InProgress, now);
        }
        exception.increment_resolution_attempt(now);
        *exception = exception_repo::save_lifecycle(pool, exception).await?;

        let mut any_success = false;
        for action in actions {
            match self.runner.run(*action, exception).await {
                Ok(true) => any_success = true,
                Ok(false) => {}
                Err(e) => {
                    warn!(exception_id = exception.id, action = %action, error = %e, "action errored");
                }
            }
        }

        if any_success {
            exception_repo::apply_status_change(exception, ExceptionStatus::Resolved, Utc::now());
            *exception = exception_repo::save_lifecycle(pool, exception).await?;

            metrics::RESOLUTION_ATTEMPTS_TOTAL
                .with_label_values(&[tenant, "resolved"])
                .inc();
            info!(exception_id = exception.id, "automated resolution succeeded");
            Ok(ResolutionOutcome::Resolved)
        } else {
            metrics::RESOLUTION_ATTEMPTS_TOTAL
                .with_label_values(&[tenant, "failed"])
                .inc();

            let budget_exhausted = !exception.is_resolution_eligible();
            info!(
                exception_id = exception.id,
                attempts = exception.resolution_attempts,
                budget_exhausted,
                "automated resolution failed"
            );
            Ok(ResolutionOutcome::Failed { budget_exhausted })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(
        can_auto_resolve: bool,
        confidence: f64,
        success_probability: f64,
        actions: Vec<AutomatedAction>,
    ) -> ResolutionAnalysis {
        ResolutionAnalysis {
            can_auto_resolve,
            confidence,
            automated_actions: actions,
            success_probability,
            resolution_strategy: None,
            reasoning: None,
            fallback_used: false,
        }
    }

    fn eligible_exception() -> ExceptionRecord {
        ExceptionRecord {
            id: 1,
            tenant: "demo-3pl".into(),
            order_id: "o-1001".into(),
            reason_code: "ADDRESS_INVALID".into(),
            status: "OPEN".into(),
            severity: "MEDIUM".into(),
            ai_label: None,
            ai_confidence: None,
            ops_note: None,
            client_note: None,
            resolution_attempts: 0,
            max_resolution_attempts: 2,
            last_resolution_attempt_at: None,
            resolution_blocked: false,
            resolution_block_reason: None,
            context_data: None,
            correlation_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn attempts_only_above_all_gates() {
        let ex = eligible_exception();
        let good = analysis(true, 0.8, 0.7, vec![AutomatedAction::AddressValidation]);

        assert_eq!(
            decide(&good, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Attempt(vec![AutomatedAction::AddressValidation])
        );
    }

    #[test]
    fn skips_when_any_gate_fails() {
        let ex = eligible_exception();

        let cannot = analysis(false, 0.9, 0.9, vec![AutomatedAction::AddressValidation]);
        assert!(matches!(
            decide(&cannot, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Skip(_)
        ));

        let low_confidence = analysis(true, 0.65, 0.9, vec![AutomatedAction::AddressValidation]);
        assert!(matches!(
            decide(&low_confidence, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Skip(_)
        ));

        let low_probability = analysis(true, 0.9, 0.5, vec![AutomatedAction::AddressValidation]);
        assert!(matches!(
            decide(&low_probability, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Skip(_)
        ));

        let no_actions = analysis(true, 0.9, 0.9, vec![]);
        assert!(matches!(
            decide(&no_actions, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Skip(_)
        ));
    }

    #[test]
    fn very_low_confidence_blocks_the_exception() {
        let ex = eligible_exception();
        let hopeless = analysis(true, 0.2, 0.9, vec![AutomatedAction::AddressValidation]);

        assert_eq!(
            decide(&hopeless, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Block(LOW_CONFIDENCE_BLOCK_REASON.to_string())
        );
    }

    #[test]
    fn ineligible_exception_is_skipped_before_anything_else() {
        let mut ex = eligible_exception();
        ex.resolution_blocked = true;

        let good = analysis(true, 0.9, 0.9, vec![AutomatedAction::AddressValidation]);
        assert!(matches!(
            decide(&good, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
            Decision::Skip(_)
        ));
    }

    #[test]
    fn fallback_table_matches_reason_codes() {
        let addr = fallback_analysis(ReasonCode::AddressInvalid);
        assert!(addr.can_auto_resolve);
        assert_eq!(addr.automated_actions, vec![AutomatedAction::AddressValidation]);
        assert!((addr.confidence - 0.6).abs() < f64::EPSILON);
        assert!(addr.fallback_used);

        let payment = fallback_analysis(ReasonCode::PaymentFailed);
        assert_eq!(payment.automated_actions, vec![AutomatedAction::PaymentRetry]);

        let system = fallback_analysis(ReasonCode::SystemError);
        assert_eq!(system.automated_actions, vec![AutomatedAction::SystemRecovery]);

        let other = fallback_analysis(ReasonCode::PickDelay);
        assert!(!other.can_auto_resolve);
        assert!(other.automated_actions.is_empty());
    }

    #[test]
    fn raw_context_contains_no_hints() {
        let exception = eligible_exception();
        let event = crate::models::OrderEvent {
            id: 1,
            tenant: "demo-3pl".into(),
            source: "shopify".into(),
            event_type: "order_paid".into(),
            event_id: "evt-1".into(),
            order_id: "o-1001".into(),
            occurred_at: Utc::now(),
            payload: json!({
                "financial_status": "pending",
                "shipping_address": {"zip": "00000"},
                "line_items": [{"sku": "SKU-1", "quantity": 1}]
            }),
            correlation_id: None,
            created_at: Utc::now(),
        };

        let context = raw_context_from_events(&exception, &[event]);
        let obj = context.as_object().unwrap();

        for forbidden in ["can_auto_resolve", "fulfillment_delay_hours", "pre_calculated_flags"] {
            assert!(!obj.contains_key(forbidden), "found hint key {forbidden}");
        }
        assert!(
            obj.keys().all(|k| !k.starts_with("hint_")),
            "found hint_-prefixed key"
        );

        // Raw fields pass through untouched.
        assert_eq!(context["financial_status"], "pending");
        assert_eq!(context["warehouse_events"][0]["event_type"], "order_paid");
    }

    #[test]
    fn fallback_gates_never_pass_execution() {
        // The fallback confidences sit below the 0.7 execution gate: the
        // engine proposes but does not execute on fallback knowledge alone.
        let ex = eligible_exception();
        for code in [
            ReasonCode::AddressInvalid,
            ReasonCode::PaymentFailed,
            ReasonCode::SystemError,
        ] {
            let analysis = fallback_analysis(code);
            assert!(matches!(
                decide(&analysis, &ex, DEFAULT_LOW_CONFIDENCE_BLOCK),
                Decision::Skip(_)
            ));
        }
    }
}
