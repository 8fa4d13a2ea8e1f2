//! End-to-end SLA breach scenarios against live Postgres + Redis
//!
//! Covers: pick-delay breach materialization (E1), duplicate suppression
//! (E2), and fallback classification with the AI disabled (E3).
//!
//! Run with: cargo test --package sentinel-rs --test sla_breach_e2e -- --ignored

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value as JsonValue};
use serial_test::serial;
use tower::ServiceExt;

use common::{create_test_tenant, get_test_pool, live_state};

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
}

fn ingest_request(tenant: &str, source: &str, body: JsonValue) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/ingest/{source}"))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-tenant-id", tenant)
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// E1: order_paid at T0 plus pick_completed at T0+180min under the default
/// 120min pick SLA yields one OPEN/MEDIUM PICK_DELAY exception with
/// delay_minutes = 60.
#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test sla_breach_e2e -- --ignored
async fn pick_delay_breach_creates_exception() {
    let state = live_state().await;
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-pick").await;
    let router = sentinel_rs::build_router(state);

    let response = router
        .clone()
        .oneshot(ingest_request(
            &tenant,
            "shopify",
            json!({
                "source": "shopify",
                "event_type": "order_paid",
                "event_id": "evt-e1-001",
                "order_id": "o-e1-0001",
                "occurred_at": "2025-01-01T10:00:00Z",
                "total_amount_cents": 2999
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(ingest_request(
            &tenant,
            "wms",
            json!({
                "source": "wms",
                "event_type": "pick_completed",
                "event_id": "evt-e1-002",
                "order_id": "o-e1-0001",
                "occurred_at": "2025-01-01T13:00:00Z",
                "station": "PICK-01"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "processed");
    assert_eq!(body["exception_created"], true);

    // Exactly one open PICK_DELAY for the order, with the exact delay.
    let rows: Vec<(String, String, JsonValue)> = sqlx::query_as(
        r#"
        SELECT status, severity, context_data FROM exceptions
        WHERE tenant = $1 AND order_id = 'o-e1-0001' AND reason_code = 'PICK_DELAY'
        "#,
    )
    .bind(&tenant)
    .fetch_all(&pool)
    .await
    .unwrap();

    assert_eq!(rows.len(), 1);
    let (status, severity, context) = &rows[0];
    assert_eq!(status, "OPEN");
    assert_eq!(severity, "MEDIUM");
    assert_eq!(context["delay_minutes"], 60);
    assert_eq!(context["actual_minutes"], 180);
    assert_eq!(context["sla_minutes"], 120);
}

/// E2: the same event ingested twice stores exactly one row; both responses
/// report processed-or-duplicate.
#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test sla_breach_e2e -- --ignored
async fn duplicate_event_is_suppressed() {
    let state = live_state().await;
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-dup").await;
    let router = sentinel_rs::build_router(state);

    let event = json!({
        "source": "shopify",
        "event_type": "order_paid",
        "event_id": "evt-e2-001",
        "order_id": "o-e2-0001",
        "occurred_at": "2025-01-01T10:00:00Z"
    });

    for expected in ["processed", "duplicate"] {
        let response = router
            .clone()
            .oneshot(ingest_request(&tenant, "shopify", event.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], expected);
    }

    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM order_events
        WHERE tenant = $1 AND source = 'shopify' AND event_id = 'evt-e2-001'
        "#,
    )
    .bind(&tenant)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

/// E3: with the AI unavailable, classification still completes through the
/// rule fallback: null confidence, `[Rules]`-prefixed ops note.
#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test sla_breach_e2e -- --ignored
async fn ai_unavailable_falls_back_to_rules() {
    // live_state() has no AI key configured, so the adapter reports Disabled
    // and every classification goes through the fallback path.
    let state = live_state().await;
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-fallback").await;
    let router = sentinel_rs::build_router(state);

    for (source, body) in [
        (
            "shopify",
            json!({
                "source": "shopify",
                "event_type": "order_paid",
                "event_id": "evt-e3-001",
                "order_id": "o-e3-0001",
                "occurred_at": "2025-01-01T10:00:00Z"
            }),
        ),
        (
            "wms",
            json!({
                "source": "wms",
                "event_type": "pick_completed",
                "event_id": "evt-e3-002",
                "order_id": "o-e3-0001",
                "occurred_at": "2025-01-01T13:00:00Z"
            }),
        ),
    ] {
        let response = router
            .clone()
            .oneshot(ingest_request(&tenant, source, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // Classification runs on the follow-up worker; give it a moment.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let (ai_confidence, ops_note): (Option<f64>, Option<String>) = sqlx::query_as(
        r#"
        SELECT ai_confidence, ops_note FROM exceptions
        WHERE tenant = $1 AND order_id = 'o-e3-0001' AND reason_code = 'PICK_DELAY'
        "#,
    )
    .bind(&tenant)
    .fetch_one(&pool)
    .await
    .unwrap();

    assert!(ai_confidence.is_none());
    assert!(ops_note.unwrap().starts_with("[Rules]"));
}
