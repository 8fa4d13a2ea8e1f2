//! Router guard and validation tests
//!
//! These run with no infrastructure: every request here is rejected (or
//! answered) before any database, Redis, or AI call would happen.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use sentinel_rs::build_router;
use sentinel_rs::security::auth::sign_admin_token;

use common::{offline_config, offline_state};

const TENANT: &str = "validation-test-tenant";

fn router() -> axum::Router {
    build_router(offline_state(offline_config()))
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
}

fn post_json(uri: &str, tenant: Option<&str>, body: JsonValue) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(tenant) = tenant {
        builder = builder.header("x-tenant-id", tenant);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn valid_shopify_event() -> JsonValue {
    json!({
        "source": "shopify",
        "event_type": "order_paid",
        "event_id": "evt-1001",
        "order_id": "o-12345",
        "occurred_at": "2025-08-16T10:00:00Z"
    })
}

#[tokio::test]
async fn healthz_is_exempt_from_tenant_header() {
    let response = router()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn metrics_is_exempt_from_tenant_header() {
    let response = router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_tenant_header_is_400() {
    let response = router()
        .oneshot(Request::get("/exceptions").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TENANT_REQUIRED");
    assert!(body["correlation_id"].is_string());
}

#[tokio::test]
async fn malformed_tenant_header_is_400() {
    for bad in ["tenant with spaces", "tenant;drop", &"x".repeat(65)] {
        let response = router()
            .oneshot(
                Request::get("/exceptions")
                    .header("x-tenant-id", bad)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "tenant {bad:?}");
    }
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let response = router()
        .oneshot(
            Request::get("/healthz")
                .header("x-correlation-id", "corr-abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "corr-abc-123"
    );
}

#[tokio::test]
async fn correlation_id_is_generated_when_absent() {
    let response = router()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let header = response.headers().get("x-correlation-id").unwrap();
    assert!(!header.to_str().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ingest_source_is_404() {
    let response = router()
        .oneshot(post_json("/ingest/fax", Some(TENANT), valid_shopify_event()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_required_field_is_422_without_side_effects() {
    let mut event = valid_shopify_event();
    event.as_object_mut().unwrap().remove("event_id");

    let response = router()
        .oneshot(post_json("/ingest/shopify", Some(TENANT), event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn wrong_event_type_for_source_is_422() {
    let mut event = valid_shopify_event();
    event["event_type"] = json!("pick_completed");
    event["source"] = json!("shopify");

    let response = router()
        .oneshot(post_json("/ingest/shopify", Some(TENANT), event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn invalid_occurred_at_is_422() {
    let mut event = valid_shopify_event();
    event["occurred_at"] = json!("yesterday-ish");

    let response = router()
        .oneshot(post_json("/ingest/shopify", Some(TENANT), event))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn empty_batch_is_422() {
    let response = router()
        .oneshot(post_json(
            "/ingest/v2/events/batch",
            Some(TENANT),
            json!({"events": []}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn batch_with_invalid_item_is_422_naming_the_index() {
    let mut bad = valid_shopify_event();
    bad["event_type"] = json!("warp_drive_engaged");

    let response = router()
        .oneshot(post_json(
            "/ingest/v2/events/batch",
            Some(TENANT),
            json!({"events": [valid_shopify_event(), bad]}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["message"].as_str().unwrap().contains("events[1]"));
}

#[tokio::test]
async fn out_of_range_page_size_is_422() {
    let response = router()
        .oneshot(
            Request::get("/exceptions?page_size=500")
                .header("x-tenant-id", TENANT)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn admin_without_token_is_401() {
    let response = router()
        .oneshot(
            Request::get("/admin/system/health")
                .header("x-tenant-id", TENANT)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_with_valid_token_reaches_system_health() {
    let config = offline_config();
    let token = sign_admin_token(&config.jwt_secret, "ops@test", 15).unwrap();

    let response = build_router(offline_state(config))
        .oneshot(
            Request::get("/admin/system/health")
                .header("x-tenant-id", TENANT)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ai"]["enabled"], false);
}

#[tokio::test]
async fn admin_with_garbage_token_is_401() {
    let response = router()
        .oneshot(
            Request::get("/admin/system/health")
                .header("x-tenant-id", TENANT)
                .header(header::AUTHORIZATION, "Bearer not.a.jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ingest_rate_limit_returns_429() {
    let mut config = offline_config();
    config.ingest_rate_limit_per_minute = 2;
    let router = build_router(offline_state(config));

    // Two schema-invalid requests burn the per-tenant budget (the limiter
    // runs before body validation)...
    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(post_json("/ingest/shopify", Some("rl-tenant"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // ...so the third is rejected by rate, not schema.
    let response = router
        .clone()
        .oneshot(post_json("/ingest/shopify", Some("rl-tenant"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another tenant is unaffected.
    let response = router
        .oneshot(post_json("/ingest/shopify", Some("other-tenant"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
