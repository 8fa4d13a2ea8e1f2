//! Order analyzer
//!
//! Inspects raw order payloads (storefront `order_paid` documents) for
//! problems that should open exceptions. The AI path is primary; when the
//! model is unavailable or insufficiently confident, a deterministic rule
//! set covers the known failure signatures. Fallback results are tagged
//! `analysis_method = "rule_based_fallback"`.

use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::ai::AiClient;
use crate::metrics;
use crate::models::ExceptionSeverity;
use crate::reason_codes::ReasonCode;

const AI_ACCEPT_CONFIDENCE: f64 = 0.7;

/// A problem worth materializing as an exception
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedProblem {
    pub reason_code: ReasonCode,
    pub severity: ExceptionSeverity,
    pub description: String,
    pub context: JsonValue,
}

/// Analyze an order payload, AI-first with rule fallback.
pub async fn analyze_order(ai: &AiClient, order_data: &JsonValue) -> Vec<DetectedProblem> {
    let order = extract_order(order_data);
    if order.is_null() {
        return Vec::new();
    }

    match ai.analyze_order_problems(order_data).await {
        Ok(report) if report.confidence >= AI_ACCEPT_CONFIDENCE => {
            metrics::AI_CONFIDENCE
                .with_label_values(&["order_analysis"])
                .observe(report.confidence);

            if !report.has_problems {
                return Vec::new();
            }

            report
                .problems
                .iter()
                .map(|problem| DetectedProblem {
                    reason_code: ReasonCode::parse(&problem.problem_type)
                        .unwrap_or(ReasonCode::Other),
                    severity: ExceptionSeverity::parse(&problem.severity)
                        .unwrap_or(ExceptionSeverity::Medium),
                    description: problem.reason.clone(),
                    context: json!({
                        "analysis_method": "ai_powered",
                        "ai_confidence": report.confidence,
                        "field": problem.field,
                        "impact": problem.impact,
                        "recommendations": report.recommendations,
                    }),
                })
                .collect()
        }
        Ok(report) => {
            debug!(
                confidence = report.confidence,
                "order analysis confidence below floor, using rules"
            );
            fallback(order)
        }
        Err(e) => {
            warn!(error = %e, "ai order analysis unavailable, using rules");
            fallback(order)
        }
    }
}

fn fallback(order: &JsonValue) -> Vec<DetectedProblem> {
    metrics::AI_FALLBACK_TOTAL
        .with_label_values(&["order_analysis"])
        .inc();
    rule_based_problems(order)
}

/// Webhook payloads nest the order under `data.order`; direct payloads are
/// the order itself.
pub fn extract_order(order_data: &JsonValue) -> &JsonValue {
    match order_data.pointer("/data/order") {
        Some(order) if order.is_object() => order,
        _ if order_data.is_object() => order_data,
        _ => &JsonValue::Null,
    }
}

/// Deterministic inspection of the known problem signatures.
pub fn rule_based_problems(order: &JsonValue) -> Vec<DetectedProblem> {
    let mut problems = Vec::new();

    if let Some(p) = check_delivery_delay(order) {
        problems.push(p);
    }
    if let Some(p) = check_payment_issues(order) {
        problems.push(p);
    }
    if let Some(p) = check_address_issues(order) {
        problems.push(p);
    }
    if let Some(p) = check_inventory_issues(order) {
        problems.push(p);
    }
    if let Some(p) = check_package_damage(order) {
        problems.push(p);
    }
    if let Some(p) = check_customer_availability(order) {
        problems.push(p);
    }

    problems
}

fn rule_context(fields: JsonValue) -> JsonValue {
    let mut ctx = fields;
    if let Some(obj) = ctx.as_object_mut() {
        obj.insert(
            "analysis_method".to_string(),
            JsonValue::String("rule_based_fallback".to_string()),
        );
    }
    ctx
}

fn check_delivery_delay(order: &JsonValue) -> Option<DetectedProblem> {
    if order.get("fulfillment_status").and_then(JsonValue::as_str) == Some("delayed") {
        return Some(DetectedProblem {
            reason_code: ReasonCode::DeliveryDelay,
            severity: ExceptionSeverity::High,
            description: "Order marked as delayed in fulfillment system".to_string(),
            context: rule_context(json!({"fulfillment_status": "delayed"})),
        });
    }

    let estimated = order
        .get("estimated_delivery_date")
        .and_then(JsonValue::as_str)?;
    let delivery_date = DateTime::parse_from_rfc3339(estimated).ok()?;
    let now = Utc::now();

    if delivery_date.with_timezone(&Utc) < now {
        let days_overdue = (now - delivery_date.with_timezone(&Utc)).num_days();
        let severity = if days_overdue > 3 {
            ExceptionSeverity::Critical
        } else if days_overdue > 1 {
            ExceptionSeverity::High
        } else {
            ExceptionSeverity::Medium
        };

        return Some(DetectedProblem {
            reason_code: ReasonCode::DeliveryDelay,
            severity,
            description: format!("Order is {days_overdue} days overdue for delivery"),
            context: rule_context(json!({
                "estimated_delivery": estimated,
                "days_overdue": days_overdue,
            })),
        });
    }

    None
}

fn check_payment_issues(order: &JsonValue) -> Option<DetectedProblem> {
    let financial_status = order.get("financial_status").and_then(JsonValue::as_str);

    if financial_status == Some("pending") {
        return Some(DetectedProblem {
            reason_code: ReasonCode::PaymentFailed,
            severity: ExceptionSeverity::High,
            description: "Payment is still pending after order creation".to_string(),
            context: rule_context(json!({"financial_status": "pending"})),
        });
    }

    if order.get("payment_issues").and_then(JsonValue::as_bool) == Some(true) {
        return Some(DetectedProblem {
            reason_code: ReasonCode::PaymentFailed,
            severity: ExceptionSeverity::High,
            description: "Payment processing issues detected".to_string(),
            context: rule_context(json!({"payment_issues": true})),
        });
    }

    None
}

fn check_address_issues(order: &JsonValue) -> Option<DetectedProblem> {
    let address = order.get("shipping_address")?;

    let zip = address.get("zip").and_then(JsonValue::as_str).unwrap_or("");
    if zip.is_empty() || matches!(zip, "00000" | "99999" | "INVALID") {
        return Some(DetectedProblem {
            reason_code: ReasonCode::AddressInvalid,
            severity: ExceptionSeverity::Medium,
            description: "Invalid or missing postal code in shipping address".to_string(),
            context: rule_context(json!({"zip_code": zip})),
        });
    }

    let street = address
        .get("address1")
        .and_then(JsonValue::as_str)
        .unwrap_or("");
    let city = address.get("city").and_then(JsonValue::as_str).unwrap_or("");

    if street.contains("Nonexistent") || city == "Nowhere" {
        return Some(DetectedProblem {
            reason_code: ReasonCode::AddressInvalid,
            severity: ExceptionSeverity::High,
            description: "Shipping address appears to be invalid or non-existent".to_string(),
            context: rule_context(json!({"city": city})),
        });
    }

    None
}

fn check_inventory_issues(order: &JsonValue) -> Option<DetectedProblem> {
    let line_items = order.get("line_items").and_then(JsonValue::as_array)?;

    for item in line_items {
        if item.get("inventory_shortage").and_then(JsonValue::as_bool) != Some(true) {
            continue;
        }

        let available = item
            .get("available_quantity")
            .and_then(JsonValue::as_i64)
            .unwrap_or(0);
        let requested = item.get("quantity").and_then(JsonValue::as_i64).unwrap_or(1);
        let title = item
            .get("title")
            .and_then(JsonValue::as_str)
            .unwrap_or("item");

        let severity = if available == 0 {
            ExceptionSeverity::Critical
        } else {
            ExceptionSeverity::High
        };

        return Some(DetectedProblem {
            reason_code: ReasonCode::InventoryShortage,
            severity,
            description: format!("Insufficient inventory for {title}"),
            context: rule_context(json!({
                "sku": item.get("sku"),
                "requested_quantity": requested,
                "available_quantity": available,
            })),
        });
    }

    None
}

fn check_package_damage(order: &JsonValue) -> Option<DetectedProblem> {
    if order.get("package_condition").and_then(JsonValue::as_str) == Some("damaged") {
        return Some(DetectedProblem {
            reason_code: ReasonCode::DamagedPackage,
            severity: ExceptionSeverity::High,
            description: "Package reported as damaged during transit".to_string(),
            context: rule_context(json!({
                "package_condition": "damaged",
                "damage_report": order.get("damage_report"),
            })),
        });
    }
    None
}

fn check_customer_availability(order: &JsonValue) -> Option<DetectedProblem> {
    let attempts = order
        .get("delivery_attempts")
        .and_then(JsonValue::as_i64)
        .unwrap_or(0);
    let delivery_status = order.get("delivery_status").and_then(JsonValue::as_str);

    if attempts >= 2 || delivery_status == Some("failed_delivery") {
        let severity = if attempts >= 3 {
            ExceptionSeverity::High
        } else {
            ExceptionSeverity::Medium
        };

        return Some(DetectedProblem {
            reason_code: ReasonCode::CustomerUnavailable,
            severity,
            description: format!("Customer unavailable for delivery after {attempts} attempts"),
            context: rule_context(json!({
                "delivery_attempts": attempts,
                "delivery_status": delivery_status,
            })),
        });
    }

    None
}
