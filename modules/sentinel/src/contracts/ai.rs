//! AI adapter operation schemas
//!
//! Responses from the model must parse into these shapes; anything else is
//! treated as a failed request and routed to the fallback path.

use serde::{Deserialize, Serialize};

/// Automated resolution actions the platform can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomatedAction {
    #[serde(alias = "address_validation_service", alias = "address_validation")]
    AddressValidation,
    #[serde(alias = "payment_retry")]
    PaymentRetry,
    #[serde(alias = "inventory_reallocation")]
    InventoryReallocation,
    #[serde(alias = "system_recovery")]
    SystemRecovery,
    #[serde(alias = "carrier_api_update")]
    CarrierApiUpdate,
}

impl AutomatedAction {
    pub const ALL: [AutomatedAction; 5] = [
        AutomatedAction::AddressValidation,
        AutomatedAction::PaymentRetry,
        AutomatedAction::InventoryReallocation,
        AutomatedAction::SystemRecovery,
        AutomatedAction::CarrierApiUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AutomatedAction::AddressValidation => "ADDRESS_VALIDATION",
            AutomatedAction::PaymentRetry => "PAYMENT_RETRY",
            AutomatedAction::InventoryReallocation => "INVENTORY_REALLOCATION",
            AutomatedAction::SystemRecovery => "SYSTEM_RECOVERY",
            AutomatedAction::CarrierApiUpdate => "CARRIER_API_UPDATE",
        }
    }
}

impl std::fmt::Display for AutomatedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `classify_exception` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionClassification {
    pub label: String,
    pub confidence: f64,
    pub ops_note: String,
    pub client_note: String,
}

/// One problem found by `analyze_order_problems`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedProblem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub field: String,
    pub reason: String,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

/// `analyze_order_problems` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProblemReport {
    pub has_problems: bool,
    pub confidence: f64,
    #[serde(default)]
    pub problems: Vec<DetectedProblem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// `analyze_automated_resolution` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionAnalysis {
    pub can_auto_resolve: bool,
    pub confidence: f64,
    #[serde(default)]
    pub automated_actions: Vec<AutomatedAction>,
    pub success_probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub fallback_used: bool,
}

/// One finding from `lint_policy`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyLintFinding {
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// `lint_policy` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyLintReport {
    pub valid: bool,
    #[serde(default)]
    pub findings: Vec<PolicyLintFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_accepts_both_naming_conventions() {
        let modern: AutomatedAction = serde_json::from_value(json!("ADDRESS_VALIDATION")).unwrap();
        assert_eq!(modern, AutomatedAction::AddressValidation);

        let legacy: AutomatedAction =
            serde_json::from_value(json!("address_validation_service")).unwrap();
        assert_eq!(legacy, AutomatedAction::AddressValidation);

        assert!(serde_json::from_value::<AutomatedAction>(json!("REBOOT_EVERYTHING")).is_err());
    }

    #[test]
    fn resolution_analysis_requires_core_fields() {
        // Missing success_probability must fail parsing; the adapter treats
        // that as a failed request.
        let missing: Result<ResolutionAnalysis, _> = serde_json::from_value(json!({
            "can_auto_resolve": true,
            "confidence": 0.9,
            "automated_actions": ["PAYMENT_RETRY"]
        }));
        assert!(missing.is_err());

        let full: ResolutionAnalysis = serde_json::from_value(json!({
            "can_auto_resolve": true,
            "confidence": 0.9,
            "automated_actions": ["PAYMENT_RETRY"],
            "success_probability": 0.7
        }))
        .unwrap();
        assert!(!full.fallback_used);
        assert_eq!(full.automated_actions, vec![AutomatedAction::PaymentRetry]);
    }

    #[test]
    fn problem_report_tolerates_missing_optionals() {
        let report: OrderProblemReport = serde_json::from_value(json!({
            "has_problems": false,
            "confidence": 0.95
        }))
        .unwrap();
        assert!(report.problems.is_empty());
        assert!(report.recommendations.is_empty());
    }
}
