//! DLQ retry bookkeeping and replay against live Postgres + Redis
//!
//! Covers the capped exponential retry schedule (property: +5, +10, +20,
//! +40, +60 minutes, FAILED at budget), and replay of a deferred ingest
//! event back through the orchestrator (E5).
//!
//! Run with: cargo test --package sentinel-rs --test dlq_replay_e2e -- --ignored

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use serial_test::serial;

use sentinel_rs::repos::dlq_repo;
use sentinel_rs::services::replay;

use common::{create_test_tenant, get_test_pool, live_state};

#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test dlq_replay_e2e -- --ignored
async fn retry_schedule_backs_off_exponentially_with_cap() {
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-backoff").await;

    let mut item = dlq_repo::push(
        &pool,
        &tenant,
        &json!({"probe": true}),
        "DependencyError",
        "synthetic failure",
        None,
        None,
        Some("ingest_event"),
        6,
    )
    .await
    .unwrap();

    assert_eq!(item.attempts, 0);
    assert_eq!(item.status, "PENDING");
    // First retry lands ~5 minutes out.
    let first_delay = item.next_retry_at.unwrap() - item.created_at;
    assert!((4..=6).contains(&first_delay.num_minutes()));

    // Failures 1..=5: delays 10, 20, 40, 60, 60 (capped).
    let expected_minutes = [10i64, 20, 40, 60, 60];
    for (i, expected) in expected_minutes.iter().enumerate() {
        let before = Utc::now();
        item = dlq_repo::mark_attempt(&pool, &item, false, Some("still failing"))
            .await
            .unwrap();

        assert_eq!(item.attempts as usize, i + 1);
        assert_eq!(item.status, "PENDING");

        let delay = item.next_retry_at.unwrap() - before;
        assert!(
            (delay.num_minutes() - expected).abs() <= 1,
            "attempt {}: expected ~{expected}min, got {}min",
            i + 1,
            delay.num_minutes()
        );
    }

    // Sixth failure exhausts max_attempts: terminal FAILED.
    item = dlq_repo::mark_attempt(&pool, &item, false, Some("final failure"))
        .await
        .unwrap();
    assert_eq!(item.attempts, 6);
    assert_eq!(item.status, "FAILED");
    assert!(item.next_retry_at.is_none());
}

/// E5: a deferred ingest event replays through the orchestrator; the event
/// lands in the store and the DLQ row flips to PROCESSED.
#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test dlq_replay_e2e -- --ignored
async fn replay_processes_deferred_ingest_event() {
    let state = live_state().await;
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-replay").await;

    let event_payload = json!({
        "source": "shopify",
        "event_type": "order_paid",
        "event_id": "evt-e5-001",
        "order_id": "o-e5-0001",
        "occurred_at": "2025-01-01T10:00:00Z"
    });

    let item = dlq_repo::push(
        &pool,
        &tenant,
        &event_payload,
        "DependencyError",
        "database: connection reset",
        None,
        Some("corr-e5"),
        Some("ingest_event"),
        3,
    )
    .await
    .unwrap();

    // Make the item immediately due.
    sqlx::query("UPDATE dlq SET next_retry_at = $2 WHERE id = $1")
        .bind(item.id)
        .bind(Utc::now() - ChronoDuration::minutes(1))
        .execute(&pool)
        .await
        .unwrap();

    let result = replay::replay_batch(&state, 10, Some(tenant.as_str()), 5)
        .await
        .unwrap();
    assert_eq!(result.fetched, 1);
    assert_eq!(result.succeeded, 1);
    assert_eq!(result.failed, 0);

    // The original event is now persisted.
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM order_events
        WHERE tenant = $1 AND source = 'shopify' AND event_id = 'evt-e5-001'
        "#,
    )
    .bind(&tenant)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    // And the DLQ row is terminal-successful.
    let (status, processed_at): (String, Option<chrono::DateTime<Utc>>) =
        sqlx::query_as("SELECT status, processed_at FROM dlq WHERE id = $1")
            .bind(item.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "PROCESSED");
    assert!(processed_at.is_some());
}

#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test dlq_replay_e2e -- --ignored
async fn unknown_operation_counts_as_failed_attempt() {
    let state = live_state().await;
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-unknown").await;

    let item = dlq_repo::push(
        &pool,
        &tenant,
        &json!({"mystery": true}),
        "InternalError",
        "who knows",
        None,
        None,
        Some("carrier_pigeon"),
        3,
    )
    .await
    .unwrap();

    sqlx::query("UPDATE dlq SET next_retry_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(item.id)
        .execute(&pool)
        .await
        .unwrap();

    let result = replay::replay_batch(&state, 10, Some(tenant.as_str()), 5)
        .await
        .unwrap();
    assert_eq!(result.failed, 1);

    let (attempts,): (i32,) = sqlx::query_as("SELECT attempts FROM dlq WHERE id = $1")
        .bind(item.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(attempts, 1);
}

#[tokio::test]
#[serial]
#[ignore] // Run explicitly with: cargo test --test dlq_replay_e2e -- --ignored
async fn cleanup_removes_only_old_terminal_items() {
    let pool = get_test_pool().await;
    let tenant = create_test_tenant(&pool, "e2e-cleanup").await;

    let old_processed = dlq_repo::push(
        &pool,
        &tenant,
        &json!({}),
        "DependencyError",
        "old",
        None,
        None,
        Some("ingest_event"),
        3,
    )
    .await
    .unwrap();
    let fresh_pending = dlq_repo::push(
        &pool,
        &tenant,
        &json!({}),
        "DependencyError",
        "fresh",
        None,
        None,
        Some("ingest_event"),
        3,
    )
    .await
    .unwrap();

    sqlx::query(
        "UPDATE dlq SET status = 'PROCESSED', updated_at = NOW() - INTERVAL '40 days' WHERE id = $1",
    )
    .bind(old_processed.id)
    .execute(&pool)
    .await
    .unwrap();

    let removed = dlq_repo::cleanup(&pool, 30, Some(tenant.as_str()))
        .await
        .unwrap();
    assert_eq!(removed, 1);

    let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dlq WHERE tenant = $1")
        .bind(&tenant)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 1);

    let (status,): (String,) = sqlx::query_as("SELECT status FROM dlq WHERE id = $1")
        .bind(fresh_pending.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(status, "PENDING");
}
