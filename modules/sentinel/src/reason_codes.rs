//! Reason-code catalog and business rules
//!
//! The closed set of categorical causes an exception can carry, with the
//! per-code operational configuration (default severity, escalation window,
//! client visibility, approval requirement, auto-resolution eligibility) and
//! the fixed breach priority table used to order SLA engine output.

use serde::{Deserialize, Serialize};

use crate::models::ExceptionSeverity;

/// Standard reason codes for SLA breaches and operational exceptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    PickDelay,
    PackDelay,
    CarrierIssue,
    MissingScan,
    StockMismatch,
    AddressError,
    SystemError,
    DeliveryDelay,
    AddressInvalid,
    PaymentFailed,
    InventoryShortage,
    DamagedPackage,
    CustomerUnavailable,
    Other,
}

impl ReasonCode {
    pub const ALL: [ReasonCode; 14] = [
        ReasonCode::PickDelay,
        ReasonCode::PackDelay,
        ReasonCode::CarrierIssue,
        ReasonCode::MissingScan,
        ReasonCode::StockMismatch,
        ReasonCode::AddressError,
        ReasonCode::SystemError,
        ReasonCode::DeliveryDelay,
        ReasonCode::AddressInvalid,
        ReasonCode::PaymentFailed,
        ReasonCode::InventoryShortage,
        ReasonCode::DamagedPackage,
        ReasonCode::CustomerUnavailable,
        ReasonCode::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PickDelay => "PICK_DELAY",
            ReasonCode::PackDelay => "PACK_DELAY",
            ReasonCode::CarrierIssue => "CARRIER_ISSUE",
            ReasonCode::MissingScan => "MISSING_SCAN",
            ReasonCode::StockMismatch => "STOCK_MISMATCH",
            ReasonCode::AddressError => "ADDRESS_ERROR",
            ReasonCode::SystemError => "SYSTEM_ERROR",
            ReasonCode::DeliveryDelay => "DELIVERY_DELAY",
            ReasonCode::AddressInvalid => "ADDRESS_INVALID",
            ReasonCode::PaymentFailed => "PAYMENT_FAILED",
            ReasonCode::InventoryShortage => "INVENTORY_SHORTAGE",
            ReasonCode::DamagedPackage => "DAMAGED_PACKAGE",
            ReasonCode::CustomerUnavailable => "CUSTOMER_UNAVAILABLE",
            ReasonCode::Other => "OTHER",
        }
    }

    /// Parse an upper-snake code. Unknown strings map to `None`; callers that
    /// need lenient handling fall back to [`ReasonCode::Other`] explicitly.
    pub fn parse(s: &str) -> Option<ReasonCode> {
        ReasonCode::ALL.into_iter().find(|code| code.as_str() == s)
    }

    /// Escalation priority: lower number = more urgent. Codes outside the
    /// fixed table rank last.
    pub fn priority(&self) -> u8 {
        match self {
            ReasonCode::SystemError => 1,
            ReasonCode::StockMismatch => 2,
            ReasonCode::AddressError => 3,
            ReasonCode::CarrierIssue => 4,
            ReasonCode::PackDelay => 5,
            ReasonCode::PickDelay => 6,
            ReasonCode::MissingScan => 7,
            ReasonCode::Other => 8,
            _ => 9,
        }
    }

    pub fn config(&self) -> &'static ReasonCodeConfig {
        reason_config(*self)
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational configuration for a reason code
#[derive(Debug, Clone)]
pub struct ReasonCodeConfig {
    pub severity: ExceptionSeverity,
    /// Whether the resolution engine may attempt automated resolution
    pub auto_resolve: bool,
    /// Hours before an unacknowledged exception escalates
    pub escalation_hours: f64,
    /// Whether the exception (and client note) is shown to the tenant's
    /// customer-facing surfaces
    pub client_visible: bool,
    /// Whether resolution actions need management approval
    pub requires_approval: bool,
    pub description: &'static str,
}

fn reason_config(code: ReasonCode) -> &'static ReasonCodeConfig {
    use ExceptionSeverity::{Critical, High, Medium};

    static PICK_DELAY: ReasonCodeConfig = ReasonCodeConfig {
        severity: Medium,
        auto_resolve: false,
        escalation_hours: 4.0,
        client_visible: true,
        requires_approval: false,
        description: "Pick operation exceeded SLA threshold",
    };
    static PACK_DELAY: ReasonCodeConfig = ReasonCodeConfig {
        severity: Medium,
        auto_resolve: false,
        escalation_hours: 2.0,
        client_visible: true,
        requires_approval: false,
        description: "Pack operation exceeded SLA threshold",
    };
    static CARRIER_ISSUE: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: false,
        escalation_hours: 1.0,
        client_visible: true,
        requires_approval: false,
        description: "Carrier pickup or delivery issue",
    };
    static MISSING_SCAN: ReasonCodeConfig = ReasonCodeConfig {
        severity: Medium,
        auto_resolve: true,
        escalation_hours: 8.0,
        client_visible: false,
        requires_approval: false,
        description: "Expected scan event not received",
    };
    static STOCK_MISMATCH: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: false,
        escalation_hours: 1.0,
        client_visible: false,
        requires_approval: true,
        description: "Inventory count mismatch detected",
    };
    static ADDRESS_ERROR: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: false,
        escalation_hours: 1.0,
        client_visible: true,
        requires_approval: false,
        description: "Shipping address validation failed",
    };
    static SYSTEM_ERROR: ReasonCodeConfig = ReasonCodeConfig {
        severity: Critical,
        auto_resolve: true,
        escalation_hours: 0.5,
        client_visible: false,
        requires_approval: false,
        description: "System or integration error",
    };
    static DELIVERY_DELAY: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: false,
        escalation_hours: 2.0,
        client_visible: true,
        requires_approval: false,
        description: "Delivery past the promised date",
    };
    static ADDRESS_INVALID: ReasonCodeConfig = ReasonCodeConfig {
        severity: Medium,
        auto_resolve: true,
        escalation_hours: 2.0,
        client_visible: true,
        requires_approval: false,
        description: "Shipping address failed validation checks",
    };
    static PAYMENT_FAILED: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: true,
        escalation_hours: 1.0,
        client_visible: true,
        requires_approval: false,
        description: "Payment pending or rejected after order creation",
    };
    static INVENTORY_SHORTAGE: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: true,
        escalation_hours: 1.0,
        client_visible: false,
        requires_approval: false,
        description: "Insufficient inventory for one or more line items",
    };
    static DAMAGED_PACKAGE: ReasonCodeConfig = ReasonCodeConfig {
        severity: High,
        auto_resolve: false,
        escalation_hours: 2.0,
        client_visible: true,
        requires_approval: false,
        description: "Package reported damaged in transit",
    };
    static CUSTOMER_UNAVAILABLE: ReasonCodeConfig = ReasonCodeConfig {
        severity: Medium,
        auto_resolve: false,
        escalation_hours: 4.0,
        client_visible: true,
        requires_approval: false,
        description: "Customer unavailable after repeated delivery attempts",
    };
    static OTHER: ReasonCodeConfig = ReasonCodeConfig {
        severity: Medium,
        auto_resolve: false,
        escalation_hours: 4.0,
        client_visible: true,
        requires_approval: false,
        description: "Other operational issue",
    };

    match code {
        ReasonCode::PickDelay => &PICK_DELAY,
        ReasonCode::PackDelay => &PACK_DELAY,
        ReasonCode::CarrierIssue => &CARRIER_ISSUE,
        ReasonCode::MissingScan => &MISSING_SCAN,
        ReasonCode::StockMismatch => &STOCK_MISMATCH,
        ReasonCode::AddressError => &ADDRESS_ERROR,
        ReasonCode::SystemError => &SYSTEM_ERROR,
        ReasonCode::DeliveryDelay => &DELIVERY_DELAY,
        ReasonCode::AddressInvalid => &ADDRESS_INVALID,
        ReasonCode::PaymentFailed => &PAYMENT_FAILED,
        ReasonCode::InventoryShortage => &INVENTORY_SHORTAGE,
        ReasonCode::DamagedPackage => &DAMAGED_PACKAGE,
        ReasonCode::CustomerUnavailable => &CUSTOMER_UNAVAILABLE,
        ReasonCode::Other => &OTHER,
    }
}
