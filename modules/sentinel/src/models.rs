//! Persistent row types and lifecycle rules
//!
//! Status/severity/source enumerations are stored as upper-snake TEXT in
//! Postgres; the row structs keep them as `String` and expose typed
//! accessors, so a bad row degrades to a recognizable parse error instead of
//! a deserialization panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::reason_codes::ReasonCode;

pub const MAX_RESOLUTION_BLOCK_REASON: &str = "Maximum resolution attempts reached";

/// Event origin system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Shopify,
    Wms,
    Carrier,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Shopify => "shopify",
            EventSource::Wms => "wms",
            EventSource::Carrier => "carrier",
        }
    }

    pub fn parse(s: &str) -> Option<EventSource> {
        match s {
            "shopify" => Some(EventSource::Shopify),
            "wms" => Some(EventSource::Wms),
            "carrier" => Some(EventSource::Carrier),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exception lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionStatus {
    Open,
    Acknowledged,
    InProgress,
    Resolved,
    Closed,
}

impl ExceptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionStatus::Open => "OPEN",
            ExceptionStatus::Acknowledged => "ACKNOWLEDGED",
            ExceptionStatus::InProgress => "IN_PROGRESS",
            ExceptionStatus::Resolved => "RESOLVED",
            ExceptionStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<ExceptionStatus> {
        match s {
            "OPEN" => Some(ExceptionStatus::Open),
            "ACKNOWLEDGED" => Some(ExceptionStatus::Acknowledged),
            "IN_PROGRESS" => Some(ExceptionStatus::InProgress),
            "RESOLVED" => Some(ExceptionStatus::Resolved),
            "CLOSED" => Some(ExceptionStatus::Closed),
            _ => None,
        }
    }

    /// Whether the lifecycle state machine permits `self -> to`.
    ///
    /// Allowed edges:
    /// OPEN -> ACKNOWLEDGED | IN_PROGRESS | CLOSED,
    /// ACKNOWLEDGED -> IN_PROGRESS | CLOSED,
    /// IN_PROGRESS -> RESOLVED | CLOSED,
    /// RESOLVED <-> CLOSED.
    pub fn can_transition_to(&self, to: ExceptionStatus) -> bool {
        use ExceptionStatus::{Acknowledged, Closed, InProgress, Open, Resolved};
        match (self, to) {
            (Open, Acknowledged) => true,
            (Open, InProgress) | (Acknowledged, InProgress) => true,
            (InProgress, Resolved) => true,
            (Open, Closed) | (Acknowledged, Closed) | (InProgress, Closed) => true,
            (Resolved, Closed) | (Closed, Resolved) => true,
            _ => false,
        }
    }

    pub fn is_terminal_like(&self) -> bool {
        matches!(self, ExceptionStatus::Resolved | ExceptionStatus::Closed)
    }
}

impl std::fmt::Display for ExceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exception severity for prioritization and escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ExceptionSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExceptionSeverity::Low => "LOW",
            ExceptionSeverity::Medium => "MEDIUM",
            ExceptionSeverity::High => "HIGH",
            ExceptionSeverity::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<ExceptionSeverity> {
        match s {
            "LOW" => Some(ExceptionSeverity::Low),
            "MEDIUM" => Some(ExceptionSeverity::Medium),
            "HIGH" => Some(ExceptionSeverity::High),
            "CRITICAL" => Some(ExceptionSeverity::Critical),
            _ => None,
        }
    }

    /// One step up, saturating at CRITICAL. Used by the escalation follow-up.
    pub fn escalated(&self) -> ExceptionSeverity {
        match self {
            ExceptionSeverity::Low => ExceptionSeverity::Medium,
            ExceptionSeverity::Medium => ExceptionSeverity::High,
            ExceptionSeverity::High | ExceptionSeverity::Critical => ExceptionSeverity::Critical,
        }
    }
}

impl std::fmt::Display for ExceptionSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DLQ item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqStatus {
    Pending,
    Processed,
    Failed,
}

impl DlqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::Pending => "PENDING",
            DlqStatus::Processed => "PROCESSED",
            DlqStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<DlqStatus> {
        match s {
            "PENDING" => Some(DlqStatus::Pending),
            "PROCESSED" => Some(DlqStatus::Processed),
            "FAILED" => Some(DlqStatus::Failed),
            _ => None,
        }
    }
}

/// Tenant configuration row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub sla_config: Option<JsonValue>,
    pub billing_config: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only order event row
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct OrderEvent {
    pub id: i64,
    pub tenant: String,
    pub source: String,
    pub event_type: String,
    pub event_id: String,
    pub order_id: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn source_enum(&self) -> Option<EventSource> {
        EventSource::parse(&self.source)
    }
}

/// SLA breach / operational problem record
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ExceptionRecord {
    pub id: i64,
    pub tenant: String,
    pub order_id: String,
    pub reason_code: String,
    pub status: String,
    pub severity: String,

    pub ai_label: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ops_note: Option<String>,
    pub client_note: Option<String>,

    pub resolution_attempts: i32,
    pub max_resolution_attempts: i32,
    pub last_resolution_attempt_at: Option<DateTime<Utc>>,
    pub resolution_blocked: bool,
    pub resolution_block_reason: Option<String>,

    pub context_data: Option<JsonValue>,
    pub correlation_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ExceptionRecord {
    pub fn status_enum(&self) -> Option<ExceptionStatus> {
        ExceptionStatus::parse(&self.status)
    }

    pub fn severity_enum(&self) -> Option<ExceptionSeverity> {
        ExceptionSeverity::parse(&self.severity)
    }

    pub fn reason_code_enum(&self) -> ReasonCode {
        ReasonCode::parse(&self.reason_code).unwrap_or(ReasonCode::Other)
    }

    /// Delay minutes recorded by the SLA engine, if present.
    pub fn delay_minutes(&self) -> Option<i64> {
        self.context_data
            .as_ref()
            .and_then(|ctx| ctx.get("delay_minutes"))
            .and_then(JsonValue::as_i64)
    }

    /// Whether the resolution engine may attempt this exception:
    /// open-or-in-progress, not blocked, attempts under budget.
    pub fn is_resolution_eligible(&self) -> bool {
        matches!(
            self.status_enum(),
            Some(ExceptionStatus::Open) | Some(ExceptionStatus::InProgress)
        ) && !self.resolution_blocked
            && self.resolution_attempts < self.max_resolution_attempts
    }

    /// Record one resolution attempt; blocks further attempts once the
    /// budget is exhausted.
    pub fn increment_resolution_attempt(&mut self, now: DateTime<Utc>) {
        self.resolution_attempts += 1;
        self.last_resolution_attempt_at = Some(now);

        if self.resolution_attempts >= self.max_resolution_attempts {
            self.resolution_blocked = true;
            self.resolution_block_reason = Some(MAX_RESOLUTION_BLOCK_REASON.to_string());
        }
    }

    /// Block this exception from further automated attempts (manual or
    /// low-confidence block).
    pub fn block_resolution(&mut self, reason: impl Into<String>) {
        self.resolution_blocked = true;
        self.resolution_block_reason = Some(reason.into());
    }

    /// Manual intervention: zero the counter and clear any block.
    pub fn reset_resolution_tracking(&mut self) {
        self.resolution_attempts = 0;
        self.resolution_blocked = false;
        self.resolution_block_reason = None;
        self.last_resolution_attempt_at = None;
    }
}

/// Dead-letter queue row
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DlqItem {
    pub id: i64,
    pub tenant: String,
    pub payload: JsonValue,
    pub error_class: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub status: String,
    pub correlation_id: Option<String>,
    pub source_operation: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl DlqItem {
    pub fn status_enum(&self) -> Option<DlqStatus> {
        DlqStatus::parse(&self.status)
    }
}

/// Backoff schedule for DLQ retries: `min(5 * 2^attempts, 60)` minutes.
pub fn dlq_backoff_minutes(attempts: i32) -> i64 {
    let attempts = attempts.clamp(0, 16) as u32;
    std::cmp::min(5i64.saturating_mul(1i64 << attempts), 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_exception(status: ExceptionStatus) -> ExceptionRecord {
        ExceptionRecord {
            id: 1,
            tenant: "demo-3pl".into(),
            order_id: "o-1001".into(),
            reason_code: "PICK_DELAY".into(),
            status: status.as_str().into(),
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
    fn state_machine_allows_documented_edges() {
        use ExceptionStatus::{Acknowledged, Closed, InProgress, Open, Resolved};

        assert!(Open.can_transition_to(Acknowledged));
        assert!(Open.can_transition_to(InProgress));
        assert!(Acknowledged.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Resolved));
        assert!(Open.can_transition_to(Closed));
        assert!(Resolved.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Resolved));
    }

    #[test]
    fn state_machine_rejects_everything_else() {
        use ExceptionStatus::{Acknowledged, Closed, InProgress, Open, Resolved};

        assert!(!Open.can_transition_to(Resolved));
        assert!(!Open.can_transition_to(Open));
        assert!(!Acknowledged.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(Open));
        assert!(!Resolved.can_transition_to(InProgress));
        assert!(!Closed.can_transition_to(Open));
        assert!(!Closed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Acknowledged));
    }

    #[test]
    fn eligibility_requires_open_unblocked_under_budget() {
        let mut ex = sample_exception(ExceptionStatus::Open);
        assert!(ex.is_resolution_eligible());

        ex.status = ExceptionStatus::InProgress.as_str().into();
        assert!(ex.is_resolution_eligible());

        ex.status = ExceptionStatus::Resolved.as_str().into();
        assert!(!ex.is_resolution_eligible());

        let mut blocked = sample_exception(ExceptionStatus::Open);
        blocked.block_resolution("manual hold");
        assert!(!blocked.is_resolution_eligible());

        let mut exhausted = sample_exception(ExceptionStatus::Open);
        exhausted.resolution_attempts = 2;
        assert!(!exhausted.is_resolution_eligible());
    }

    #[test]
    fn attempt_budget_blocks_at_max() {
        let mut ex = sample_exception(ExceptionStatus::Open);

        ex.increment_resolution_attempt(Utc::now());
        assert_eq!(ex.resolution_attempts, 1);
        assert!(!ex.resolution_blocked);
        assert!(ex.is_resolution_eligible());

        ex.increment_resolution_attempt(Utc::now());
        assert_eq!(ex.resolution_attempts, 2);
        assert!(ex.resolution_blocked);
        assert_eq!(
            ex.resolution_block_reason.as_deref(),
            Some(MAX_RESOLUTION_BLOCK_REASON)
        );
        assert!(!ex.is_resolution_eligible());
    }

    #[test]
    fn reset_clears_attempt_tracking() {
        let mut ex = sample_exception(ExceptionStatus::Open);
        ex.increment_resolution_attempt(Utc::now());
        ex.increment_resolution_attempt(Utc::now());
        assert!(ex.resolution_blocked);

        ex.reset_resolution_tracking();
        assert_eq!(ex.resolution_attempts, 0);
        assert!(!ex.resolution_blocked);
        assert!(ex.resolution_block_reason.is_none());
        assert!(ex.last_resolution_attempt_at.is_none());
        assert!(ex.is_resolution_eligible());
    }

    #[test]
    fn dlq_backoff_doubles_and_caps() {
        assert_eq!(dlq_backoff_minutes(0), 5);
        assert_eq!(dlq_backoff_minutes(1), 10);
        assert_eq!(dlq_backoff_minutes(2), 20);
        assert_eq!(dlq_backoff_minutes(3), 40);
        assert_eq!(dlq_backoff_minutes(4), 60);
        assert_eq!(dlq_backoff_minutes(10), 60);
    }

    #[test]
    fn severity_escalation_saturates() {
        assert_eq!(ExceptionSeverity::Low.escalated(), ExceptionSeverity::Medium);
        assert_eq!(ExceptionSeverity::High.escalated(), ExceptionSeverity::Critical);
        assert_eq!(ExceptionSeverity::Critical.escalated(), ExceptionSeverity::Critical);
    }

    #[test]
    fn delay_minutes_reads_context_data() {
        let mut ex = sample_exception(ExceptionStatus::Open);
        assert_eq!(ex.delay_minutes(), None);

        ex.context_data = Some(serde_json::json!({"delay_minutes": 60}));
        assert_eq!(ex.delay_minutes(), Some(60));
    }
}
