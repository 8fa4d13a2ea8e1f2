//! SLA engine
//!
//! Pure evaluation of an order's event timeline against tenant policy.
//! Given the same timeline, policy, evaluation instant, and volume figure,
//! the output is identical; consumers rely on that and upsert breaches on
//! `(tenant, order_id, reason_code)`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::OrderEvent;
use crate::reason_codes::ReasonCode;
use crate::services::policy::SlaPolicy;

/// One detected SLA violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaBreach {
    pub reason_code: ReasonCode,
    pub actual_minutes: i64,
    pub sla_minutes: i64,
    pub delay_minutes: i64,
    pub anchor_event: String,
    /// `None` for open-ended breaches where the terminal event never arrived
    pub terminal_event: Option<String>,
}

impl SlaBreach {
    /// Context blob stored on the materialized exception.
    pub fn context_data(&self) -> serde_json::Value {
        json!({
            "actual_minutes": self.actual_minutes,
            "sla_minutes": self.sla_minutes,
            "delay_minutes": self.delay_minutes,
            "anchor_event": self.anchor_event,
            "terminal_event": self.terminal_event,
            "open_ended": self.terminal_event.is_none(),
        })
    }
}

/// An interval rule derived from tenant policy
#[derive(Debug, Clone)]
struct SlaRule {
    anchor: &'static str,
    terminal: &'static str,
    threshold_minutes: i64,
    reason_code: ReasonCode,
}

fn rules_from_policy(policy: &SlaPolicy) -> Vec<SlaRule> {
    vec![
        SlaRule {
            anchor: "order_paid",
            terminal: "pick_completed",
            threshold_minutes: policy.pick_minutes,
            reason_code: ReasonCode::PickDelay,
        },
        SlaRule {
            anchor: "pick_completed",
            terminal: "pack_completed",
            threshold_minutes: policy.pack_minutes,
            reason_code: ReasonCode::PackDelay,
        },
        SlaRule {
            anchor: "pack_completed",
            terminal: "ship_label_printed",
            threshold_minutes: policy.ship_minutes,
            reason_code: ReasonCode::MissingScan,
        },
        SlaRule {
            anchor: "picked_up",
            terminal: "delivered",
            threshold_minutes: policy.carrier_delivery_days * 24 * 60,
            reason_code: ReasonCode::CarrierIssue,
        },
    ]
}

/// Map each event type to its earliest occurrence.
pub fn build_event_timeline(events: &[OrderEvent]) -> BTreeMap<String, DateTime<Utc>> {
    let mut timeline: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
    for event in events {
        timeline
            .entry(event.event_type.clone())
            .and_modify(|ts| {
                if event.occurred_at < *ts {
                    *ts = event.occurred_at;
                }
            })
            .or_insert(event.occurred_at);
    }
    timeline
}

fn duration_minutes(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_minutes()
}

/// Evaluate every rule independently against the timeline.
///
/// Rules whose anchor is missing are skipped. A present anchor with a
/// missing terminal event produces an open-ended breach once `now` exceeds
/// the threshold. `threshold_multiplier` widens every threshold (weekend /
/// holiday / high-volume conditions; 1.0 otherwise).
///
/// The result is sorted by the fixed reason-code priority table.
pub fn detect_breaches(
    timeline: &BTreeMap<String, DateTime<Utc>>,
    policy: &SlaPolicy,
    now: DateTime<Utc>,
    threshold_multiplier: f64,
) -> Vec<SlaBreach> {
    let mut breaches = Vec::new();

    for rule in rules_from_policy(policy) {
        let Some(&anchor_at) = timeline.get(rule.anchor) else {
            continue;
        };

        let sla_minutes = ((rule.threshold_minutes as f64) * threshold_multiplier).round() as i64;

        match timeline.get(rule.terminal) {
            Some(&terminal_at) => {
                let actual = duration_minutes(anchor_at, terminal_at);
                if actual > sla_minutes {
                    breaches.push(SlaBreach {
                        reason_code: rule.reason_code,
                        actual_minutes: actual,
                        sla_minutes,
                        delay_minutes: actual - sla_minutes,
                        anchor_event: rule.anchor.to_string(),
                        terminal_event: Some(rule.terminal.to_string()),
                    });
                }
            }
            None => {
                let elapsed = duration_minutes(anchor_at, now);
                if elapsed > sla_minutes {
                    breaches.push(SlaBreach {
                        reason_code: rule.reason_code,
                        actual_minutes: elapsed,
                        sla_minutes,
                        delay_minutes: elapsed - sla_minutes,
                        anchor_event: rule.anchor.to_string(),
                        terminal_event: None,
                    });
                }
            }
        }
    }

    breaches.sort_by_key(|b| (b.reason_code.priority(), b.reason_code.as_str()));
    breaches
}

/// Full evaluation from raw events.
pub fn evaluate(
    events: &[OrderEvent],
    policy: &SlaPolicy,
    now: DateTime<Utc>,
    hourly_order_count: i64,
) -> Vec<SlaBreach> {
    if events.is_empty() {
        return Vec::new();
    }
    let timeline = build_event_timeline(events);
    let multiplier = policy.threshold_multiplier(now, hourly_order_count);
    detect_breaches(&timeline, policy, now, multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn event(event_type: &str, occurred_at: DateTime<Utc>) -> OrderEvent {
        OrderEvent {
            id: 0,
            tenant: "test-tenant".into(),
            source: "wms".into(),
            event_type: event_type.into(),
            event_id: format!("evt-{event_type}"),
            order_id: "order-001".into(),
            occurred_at,
            payload: json!({}),
            correlation_id: None,
            created_at: occurred_at,
        }
    }

    fn base_time() -> DateTime<Utc> {
        // A Wednesday: no weekend multiplier in play.
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn timeline_keeps_earliest_occurrence_per_type() {
        let t0 = base_time();
        let events = vec![
            event("order_paid", t0),
            event("pick_completed", t0 + Duration::minutes(90)),
            event("pick_completed", t0 + Duration::minutes(30)),
        ];

        let timeline = build_event_timeline(&events);
        assert_eq!(timeline["order_paid"], t0);
        assert_eq!(timeline["pick_completed"], t0 + Duration::minutes(30));
    }

    #[test]
    fn pick_within_threshold_is_not_a_breach() {
        let t0 = base_time();
        let events = vec![
            event("order_paid", t0),
            event("pick_completed", t0 + Duration::minutes(90)),
        ];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(91), 0);
        assert!(breaches.is_empty());
    }

    #[test]
    fn pick_exceeding_threshold_breaches_with_exact_delay() {
        let t0 = base_time();
        let events = vec![
            event("order_paid", t0),
            event("pick_completed", t0 + Duration::minutes(180)),
        ];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(181), 0);

        assert_eq!(breaches.len(), 1);
        let breach = &breaches[0];
        assert_eq!(breach.reason_code, ReasonCode::PickDelay);
        assert_eq!(breach.actual_minutes, 180);
        assert_eq!(breach.sla_minutes, 120);
        assert_eq!(breach.delay_minutes, 60);
        assert_eq!(breach.terminal_event.as_deref(), Some("pick_completed"));
    }

    #[test]
    fn pack_rule_anchors_on_pick_completed() {
        let t0 = base_time();
        let events = vec![
            event("pick_completed", t0),
            event("pack_completed", t0 + Duration::minutes(240)),
        ];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(241), 0);

        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].reason_code, ReasonCode::PackDelay);
        assert_eq!(breaches[0].actual_minutes, 240);
        assert_eq!(breaches[0].sla_minutes, 180);
        assert_eq!(breaches[0].delay_minutes, 60);
    }

    #[test]
    fn multiple_breaches_sorted_by_priority() {
        let t0 = base_time();
        let events = vec![
            event("order_paid", t0),
            event("pick_completed", t0 + Duration::minutes(180)),
            event("pack_completed", t0 + Duration::minutes(420)),
        ];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(421), 0);

        assert_eq!(breaches.len(), 2);
        // PACK_DELAY (priority 5) sorts before PICK_DELAY (priority 6).
        assert_eq!(breaches[0].reason_code, ReasonCode::PackDelay);
        assert_eq!(breaches[1].reason_code, ReasonCode::PickDelay);
    }

    #[test]
    fn missing_anchor_produces_no_breach() {
        let t0 = base_time();
        let events = vec![event("pick_completed", t0)];

        // No order_paid anchor; pack rule anchor present but within window.
        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(10), 0);
        assert!(breaches.is_empty());
    }

    #[test]
    fn missing_terminal_breaches_open_ended_after_threshold() {
        let t0 = base_time();
        let events = vec![event("order_paid", t0)];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(130), 0);

        assert_eq!(breaches.len(), 1);
        let breach = &breaches[0];
        assert_eq!(breach.reason_code, ReasonCode::PickDelay);
        assert_eq!(breach.terminal_event, None);
        assert_eq!(breach.actual_minutes, 130);
        assert_eq!(breach.delay_minutes, 10);
    }

    #[test]
    fn missing_terminal_within_threshold_is_silent() {
        let t0 = base_time();
        let events = vec![event("order_paid", t0)];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(60), 0);
        assert!(breaches.is_empty());
    }

    #[test]
    fn carrier_rule_spans_days() {
        let t0 = base_time();
        let events = vec![
            event("picked_up", t0),
            event("delivered", t0 + Duration::days(6)),
        ];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::days(7), 0);

        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].reason_code, ReasonCode::CarrierIssue);
        assert_eq!(breaches[0].sla_minutes, 5 * 24 * 60);
        assert_eq!(breaches[0].delay_minutes, 24 * 60);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let t0 = base_time();
        let events = vec![
            event("order_paid", t0),
            event("pick_completed", t0 + Duration::minutes(180)),
            event("pack_completed", t0 + Duration::minutes(420)),
        ];
        let now = t0 + Duration::minutes(500);
        let policy = SlaPolicy::default();

        let first = evaluate(&events, &policy, now, 42);
        for _ in 0..10 {
            assert_eq!(evaluate(&events, &policy, now, 42), first);
        }
    }

    #[test]
    fn high_volume_multiplier_widens_threshold() {
        let t0 = base_time();
        let events = vec![
            event("order_paid", t0),
            // 150min: over the base 120 but under 120 * 1.3 = 156.
            event("pick_completed", t0 + Duration::minutes(150)),
        ];
        let policy = SlaPolicy::default();

        let normal = evaluate(&events, &policy, t0 + Duration::minutes(151), 0);
        assert_eq!(normal.len(), 1);

        let busy = evaluate(&events, &policy, t0 + Duration::minutes(151), 500);
        assert!(busy.is_empty());
    }

    #[test]
    fn weekend_multiplier_widens_threshold() {
        // 2025-01-04 was a Saturday.
        let t0 = Utc.with_ymd_and_hms(2025, 1, 4, 10, 0, 0).unwrap();
        let events = vec![
            event("order_paid", t0),
            // 150min: over 120 but under 120 * 1.5 = 180.
            event("pick_completed", t0 + Duration::minutes(150)),
        ];

        let breaches = evaluate(&events, &SlaPolicy::default(), t0 + Duration::minutes(151), 0);
        assert!(breaches.is_empty());
    }

    #[test]
    fn empty_timeline_yields_no_breaches() {
        let breaches = evaluate(&[], &SlaPolicy::default(), base_time(), 0);
        assert!(breaches.is_empty());
    }

    #[test]
    fn context_data_records_timing() {
        let breach = SlaBreach {
            reason_code: ReasonCode::PickDelay,
            actual_minutes: 180,
            sla_minutes: 120,
            delay_minutes: 60,
            anchor_event: "order_paid".into(),
            terminal_event: Some("pick_completed".into()),
        };

        let ctx = breach.context_data();
        assert_eq!(ctx["delay_minutes"], 60);
        assert_eq!(ctx["open_ended"], false);
    }
}
