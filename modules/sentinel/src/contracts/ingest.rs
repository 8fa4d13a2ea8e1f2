//! Ingest endpoint contracts
//!
//! One request shape shared by the three source endpoints; the allowed
//! `event_type` vocabulary depends on the source taken from the URL path.
//! Unknown extra fields are captured and persisted verbatim with the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::AppError;
use crate::models::EventSource;

pub const SHOPIFY_EVENT_TYPES: &[&str] = &[
    "order_paid",
    "order_fulfilled",
    "fulfillment_update",
    "order_cancelled",
];

pub const WMS_EVENT_TYPES: &[&str] = &[
    "pick_started",
    "pick_completed",
    "pack_started",
    "pack_completed",
    "ship_label_printed",
    "label_created",
    "manifested",
    "exception_reported",
];

pub const CARRIER_EVENT_TYPES: &[&str] = &[
    "pickup_scheduled",
    "picked_up",
    "shipment_dispatched",
    "in_transit",
    "out_for_delivery",
    "delivered",
    "delivery_failed",
    "returned",
];

pub fn allowed_event_types(source: EventSource) -> &'static [&'static str] {
    match source {
        EventSource::Shopify => SHOPIFY_EVENT_TYPES,
        EventSource::Wms => WMS_EVENT_TYPES,
        EventSource::Carrier => CARRIER_EVENT_TYPES,
    }
}

/// Inbound event body for `POST /ingest/{source}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEventRequest {
    /// Optional echo of the path source; must match when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    pub event_type: String,
    pub event_id: String,
    pub order_id: String,
    /// ISO-8601 datetime string, UTC
    pub occurred_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_reason: Option<String>,

    /// Per-event extension fields, persisted with the event
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// A schema-validated event ready for the orchestrator
#[derive(Debug, Clone)]
pub struct ValidatedEvent {
    pub source: EventSource,
    pub event_type: String,
    pub event_id: String,
    pub order_id: String,
    pub occurred_at: DateTime<Utc>,
    /// Verbatim request body, persisted as the event payload
    pub raw: JsonValue,
}

impl IngestEventRequest {
    /// Validate the request against the schema for `source`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] naming every violated constraint;
    /// validation failures never have side effects.
    pub fn validate(&self, source: EventSource) -> Result<ValidatedEvent, AppError> {
        let mut problems: Vec<String> = Vec::new();

        if let Some(declared) = &self.source {
            if declared != source.as_str() {
                problems.push(format!(
                    "source '{declared}' does not match endpoint '{source}'"
                ));
            }
        }

        if !allowed_event_types(source).contains(&self.event_type.as_str()) {
            problems.push(format!(
                "event_type '{}' is not valid for source '{source}'",
                self.event_type
            ));
        }

        check_len(&mut problems, "event_id", &self.event_id, 1, 128);
        check_len(&mut problems, "order_id", &self.order_id, 1, 128);

        if let Some(v) = &self.idempotency_key {
            check_len(&mut problems, "idempotency_key", v, 1, 128);
        }
        if let Some(v) = &self.carrier {
            check_len(&mut problems, "carrier", v, 0, 64);
        }
        if let Some(v) = &self.tracking_number {
            check_len(&mut problems, "tracking_number", v, 0, 128);
        }
        if let Some(v) = &self.address_hash {
            check_len(&mut problems, "address_hash", v, 0, 64);
        }
        if let Some(v) = &self.station {
            check_len(&mut problems, "station", v, 0, 32);
        }
        if let Some(v) = &self.worker_id {
            check_len(&mut problems, "worker_id", v, 0, 32);
        }
        if let Some(v) = &self.zone {
            check_len(&mut problems, "zone", v, 0, 32);
        }
        if let Some(v) = &self.location {
            check_len(&mut problems, "location", v, 0, 128);
        }
        if let Some(v) = &self.delivery_notes {
            check_len(&mut problems, "delivery_notes", v, 0, 256);
        }
        if let Some(v) = &self.exception_reason {
            check_len(&mut problems, "exception_reason", v, 0, 128);
        }
        if let Some(n) = self.items_count {
            if n < 0 {
                problems.push("items_count must be >= 0".to_string());
            }
        }
        if let Some(n) = self.line_count {
            if n < 0 {
                problems.push("line_count must be >= 0".to_string());
            }
        }
        if let Some(n) = self.total_amount_cents {
            if n < 0 {
                problems.push("total_amount_cents must be >= 0".to_string());
            }
        }

        let occurred_at = match parse_occurred_at(&self.occurred_at) {
            Ok(ts) => Some(ts),
            Err(msg) => {
                problems.push(msg);
                None
            }
        };

        let (Some(occurred_at), true) = (occurred_at, problems.is_empty()) else {
            return Err(AppError::Validation(problems.join("; ")));
        };

        let mut raw = serde_json::to_value(self)
            .map_err(|e| AppError::Internal(format!("event serialization: {e}")))?;
        // The stored payload always states its source explicitly.
        if let Some(obj) = raw.as_object_mut() {
            obj.insert(
                "source".to_string(),
                JsonValue::String(source.as_str().to_string()),
            );
        }

        Ok(ValidatedEvent {
            source,
            event_type: self.event_type.clone(),
            event_id: self.event_id.clone(),
            order_id: self.order_id.clone(),
            occurred_at,
            raw,
        })
    }
}

fn check_len(problems: &mut Vec<String>, field: &str, value: &str, min: usize, max: usize) {
    let len = value.chars().count();
    if len < min {
        problems.push(format!("{field} must not be empty"));
    }
    if len > max {
        problems.push(format!("{field} exceeds {max} characters"));
    }
}

fn parse_occurred_at(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("occurred_at must be a valid ISO 8601 datetime, got '{raw}'"))
}

/// Response for the single-event ingest endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub status: String,
    pub message: String,
    pub event_id: Option<String>,
    pub order_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub exception_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_id: Option<i64>,
    pub correlation_id: Option<String>,
}

/// Request for `POST /ingest/v2/events/batch`
#[derive(Debug, Clone, Deserialize)]
pub struct BatchIngestRequest {
    pub events: Vec<IngestEventRequest>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// Response for the batch endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestResponse {
    pub processed_count: usize,
    pub event_ids: Vec<String>,
    pub status: String,
    pub message: String,
    pub processing_time_ms: u64,
}
