//! AI-assisted exception classification with rule-based fallback
//!
//! `AI_MODE` decides the path: `full` requires the model and fails loudly,
//! `fallback` never calls it, `smart` accepts the model's answer only above
//! the configured confidence floor. The fallback path writes deterministic
//! notes from the reason-code template table and leaves `ai_confidence`
//! null so consumers can tell the two apart.

use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::ai::{AiClient, ClassificationContext};
use crate::config::{AiMode, Config};
use crate::error::AppError;
use crate::metrics;
use crate::models::ExceptionRecord;
use crate::reason_codes::ReasonCode;
use crate::repos::exception_repo;
use crate::security::pii::redact_order_id;

const OPS_NOTE_MAX: usize = 2000;
const CLIENT_NOTE_MAX: usize = 1000;

/// Classify one exception, or apply the fallback templates.
///
/// # Errors
///
/// In `AI_MODE=full`, AI failures propagate so the caller can capture the
/// work item for replay. In other modes this only fails on storage errors.
pub async fn classify_or_fallback(
    pool: &PgPool,
    ai: &AiClient,
    config: &Config,
    exception: &ExceptionRecord,
) -> Result<(), AppError> {
    if exception.ops_note.is_some() && exception.client_note.is_some() {
        debug!(exception_id = exception.id, "already classified, skipping");
        return Ok(());
    }

    match config.ai_mode {
        AiMode::Fallback => {
            apply_fallback(pool, exception).await?;
            metrics::AI_FALLBACK_TOTAL
                .with_label_values(&["exception_analysis"])
                .inc();
            Ok(())
        }
        AiMode::Full => {
            let classification = try_ai(ai, exception).await.map_err(|e| {
                warn!(exception_id = exception.id, error = %e, "ai required but failed");
                AppError::Dependency(format!("ai classification required but failed: {e}"))
            })?;
            apply_ai(pool, exception, &classification).await
        }
        AiMode::Smart => match try_ai(ai, exception).await {
            Ok(classification) if classification.confidence >= config.ai_min_confidence => {
                apply_ai(pool, exception, &classification).await
            }
            Ok(classification) => {
                debug!(
                    exception_id = exception.id,
                    confidence = classification.confidence,
                    "ai confidence below floor, using fallback"
                );
                apply_fallback(pool, exception).await?;
                metrics::AI_FALLBACK_TOTAL
                    .with_label_values(&["exception_analysis"])
                    .inc();
                Ok(())
            }
            Err(e) => {
                debug!(exception_id = exception.id, error = %e, "ai unavailable, using fallback");
                apply_fallback(pool, exception).await?;
                metrics::AI_FALLBACK_TOTAL
                    .with_label_values(&["exception_analysis"])
                    .inc();
                Ok(())
            }
        },
    }
}

async fn try_ai(
    ai: &AiClient,
    exception: &ExceptionRecord,
) -> Result<crate::contracts::ai::ExceptionClassification, crate::ai::AiError> {
    let context = classification_context(exception);
    ai.classify_exception(&context).await
}

/// Build the narrow AI context: identifiers reduced to suffixes, timing
/// lifted from the breach context.
pub fn classification_context(exception: &ExceptionRecord) -> ClassificationContext {
    let ctx = exception.context_data.as_ref();
    let get_i64 = |key: &str| {
        ctx.and_then(|c| c.get(key))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    };

    ClassificationContext {
        reason_code: exception.reason_code.clone(),
        order_id_suffix: redact_order_id(&exception.order_id),
        tenant: exception.tenant.clone(),
        severity: exception.severity.clone(),
        status: exception.status.clone(),
        duration_minutes: get_i64("actual_minutes"),
        sla_minutes: get_i64("sla_minutes"),
        delay_minutes: get_i64("delay_minutes"),
    }
}

async fn apply_ai(
    pool: &PgPool,
    exception: &ExceptionRecord,
    classification: &crate::contracts::ai::ExceptionClassification,
) -> Result<(), AppError> {
    let label = match ReasonCode::parse(&classification.label) {
        Some(code) => code.as_str(),
        None => ReasonCode::Other.as_str(),
    };

    let ops_note = truncate_chars(&classification.ops_note, OPS_NOTE_MAX);
    let client_note = truncate_chars(&classification.client_note, CLIENT_NOTE_MAX);

    exception_repo::set_ai_analysis(
        pool,
        &exception.tenant,
        exception.id,
        Some(label),
        Some(classification.confidence),
        &ops_note,
        &client_note,
    )
    .await?;

    metrics::AI_CONFIDENCE
        .with_label_values(&["exception_analysis"])
        .observe(classification.confidence);

    info!(
        exception_id = exception.id,
        label,
        confidence = classification.confidence,
        "ai classification applied"
    );
    Ok(())
}

async fn apply_fallback(pool: &PgPool, exception: &ExceptionRecord) -> Result<(), AppError> {
    let label = match ReasonCode::parse(&exception.reason_code) {
        Some(code) => code.as_str(),
        None => ReasonCode::Other.as_str(),
    };

    let (ops_note, client_note) = fallback_notes(exception);

    exception_repo::set_ai_analysis(
        pool,
        &exception.tenant,
        exception.id,
        Some(label),
        None,
        &ops_note,
        &client_note,
    )
    .await?;

    info!(exception_id = exception.id, label, "fallback classification applied");
    Ok(())
}

/// Deterministic note templates keyed by reason code.
///
/// Ops notes are prefixed `[Rules]` so dashboards can distinguish them from
/// model-written narratives.
pub fn fallback_notes(exception: &ExceptionRecord) -> (String, String) {
    let order_suffix = redact_order_id(&exception.order_id);
    let delay_info = match exception.delay_minutes() {
        Some(delay) if delay > 0 => format!(" (delayed by {delay} minutes)"),
        _ => String::new(),
    };

    let (ops, client) = match exception.reason_code_enum() {
        ReasonCode::PickDelay => (
            format!("[Rules] Pick operation exceeded SLA threshold{delay_info}. Check station capacity and worker allocation. Review order complexity and inventory location."),
            "Your order is taking longer than expected to pick from our warehouse. We're working to get it processed soon.".to_string(),
        ),
        ReasonCode::PackDelay => (
            format!("[Rules] Pack operation exceeded SLA threshold{delay_info}. Check packing station efficiency and material availability. Review order size and packaging requirements."),
            "Your order is taking longer than expected to pack. We're working to get it ready for shipment soon.".to_string(),
        ),
        ReasonCode::CarrierIssue => (
            format!("[Rules] Carrier pickup/delivery exceeded SLA threshold{delay_info}. Contact carrier for status update. Check manifest and tracking information."),
            "There may be a delay with your shipment. We're working with our carrier partner to resolve this quickly.".to_string(),
        ),
        ReasonCode::MissingScan => (
            format!("[Rules] Expected scan event not received{delay_info}. Check scanner connectivity and worker training. Verify process compliance."),
            "We're tracking your order through our fulfillment process. Updates will be provided as they become available.".to_string(),
        ),
        ReasonCode::StockMismatch => (
            format!("[Rules] Inventory count mismatch detected for order {order_suffix}. Perform cycle count and investigate discrepancy. Check for damaged or misplaced items."),
            "We're verifying inventory for your order. This may cause a brief delay, but we'll update you with any changes.".to_string(),
        ),
        ReasonCode::AddressError | ReasonCode::AddressInvalid => (
            format!("[Rules] Shipping address validation failed for order {order_suffix}. Contact customer for address verification. Check address format and postal codes."),
            "We need to verify your shipping address to ensure successful delivery. Please check your contact information.".to_string(),
        ),
        ReasonCode::SystemError => (
            format!("[Rules] System or integration error detected for order {order_suffix}. Check system logs and API connectivity. Escalate to technical team immediately."),
            "We're experiencing a technical issue with your order. Our team is working to resolve this quickly.".to_string(),
        ),
        ReasonCode::PaymentFailed => (
            format!("[Rules] Payment problem detected for order {order_suffix}. Check gateway response and retry eligibility. Contact customer if the payment cannot be recovered."),
            "There was a problem processing payment for your order. Please verify your payment details.".to_string(),
        ),
        ReasonCode::DeliveryDelay => (
            format!("[Rules] Delivery past the promised date for order {order_suffix}{delay_info}. Check carrier tracking and notify the customer proactively."),
            "Your delivery is running behind schedule. We're watching it closely and will update you as it moves.".to_string(),
        ),
        ReasonCode::InventoryShortage => (
            format!("[Rules] Insufficient inventory for order {order_suffix}. Check alternative locations and reallocation options. Review replenishment schedule."),
            "One of your items is briefly out of stock. We're checking other locations to keep your order moving.".to_string(),
        ),
        _ => (
            format!("[Rules] Operational exception detected for order {order_suffix}{delay_info}. Investigate root cause and take corrective action."),
            "We're working on your order and will provide updates as they become available.".to_string(),
        ),
    };

    (ops, client)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn exception(reason_code: &str, context: Option<serde_json::Value>) -> ExceptionRecord {
        ExceptionRecord {
            id: 7,
            tenant: "demo-3pl".into(),
            order_id: "o-123456".into(),
            reason_code: reason_code.into(),
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
            context_data: context,
            correlation_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn fallback_ops_notes_carry_rules_prefix() {
        for code in ReasonCode::ALL {
            let (ops, client) = fallback_notes(&exception(code.as_str(), None));
            assert!(ops.starts_with("[Rules]"), "{code}: {ops}");
            assert!(!client.contains("[Rules]"));
        }
    }

    #[test]
    fn fallback_notes_include_delay_when_present() {
        let ex = exception("PICK_DELAY", Some(json!({"delay_minutes": 60})));
        let (ops, _) = fallback_notes(&ex);
        assert!(ops.contains("delayed by 60 minutes"));
    }

    #[test]
    fn fallback_notes_redact_order_id() {
        let ex = exception("STOCK_MISMATCH", None);
        let (ops, _) = fallback_notes(&ex);
        assert!(ops.contains("***3456"));
        assert!(!ops.contains("o-123456"));
    }

    #[test]
    fn classification_context_uses_suffix_and_timing() {
        let ex = exception(
            "PICK_DELAY",
            Some(json!({"actual_minutes": 180, "sla_minutes": 120, "delay_minutes": 60})),
        );

        let ctx = classification_context(&ex);
        assert_eq!(ctx.order_id_suffix, "***3456");
        assert_eq!(ctx.duration_minutes, 180);
        assert_eq!(ctx.sla_minutes, 120);
        assert_eq!(ctx.delay_minutes, 60);
    }

    #[test]
    fn truncation_is_character_safe() {
        let long = "é".repeat(3000);
        let truncated = truncate_chars(&long, OPS_NOTE_MAX);
        assert_eq!(truncated.chars().count(), OPS_NOTE_MAX);

        assert_eq!(truncate_chars("short", 2000), "short");
    }
}
