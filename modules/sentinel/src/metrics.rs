//! Prometheus collectors
//!
//! Registered lazily against the default registry and scraped via
//! `GET /metrics`. Registration failures are programming errors (duplicate
//! names) and abort at first touch during startup.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, Encoder,
    HistogramVec, IntCounterVec, IntGaugeVec, TextEncoder,
};

pub static EVENTS_INGESTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sentinel_events_ingested_total",
        "Order events accepted by the ingestion orchestrator",
        &["tenant", "source", "status"]
    )
    .expect("register sentinel_events_ingested_total")
});

pub static EXCEPTIONS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sentinel_exceptions_created_total",
        "Exceptions opened by breach or problem detection",
        &["tenant", "reason_code"]
    )
    .expect("register sentinel_exceptions_created_total")
});

pub static DLQ_ITEMS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sentinel_dlq_items_total",
        "Work items captured into the dead-letter queue",
        &["tenant", "error_class"]
    )
    .expect("register sentinel_dlq_items_total")
});

pub static DLQ_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "sentinel_dlq_depth",
        "Pending dead-letter items per tenant",
        &["tenant"]
    )
    .expect("register sentinel_dlq_depth")
});

pub static AI_FALLBACK_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sentinel_ai_fallback_total",
        "Operations answered by the rule-based fallback instead of AI",
        &["operation"]
    )
    .expect("register sentinel_ai_fallback_total")
});

pub static AI_CONFIDENCE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "sentinel_ai_confidence",
        "Confidence reported by accepted AI results",
        &["operation"],
        vec![0.0, 0.2, 0.4, 0.55, 0.7, 0.8, 0.9, 1.0]
    )
    .expect("register sentinel_ai_confidence")
});

pub static FOLLOWUPS_DROPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sentinel_followups_dropped_total",
        "Follow-up tasks dropped because the bounded queue was full",
        &["task"]
    )
    .expect("register sentinel_followups_dropped_total")
});

pub static RESOLUTION_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "sentinel_resolution_attempts_total",
        "Automated resolution attempts by outcome",
        &["tenant", "outcome"]
    )
    .expect("register sentinel_resolution_attempts_total")
});

/// Render the default registry in the Prometheus text format.
pub fn gather() -> String {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
