//! Dead-letter queue access
//!
//! Failed work items with retry scheduling. Retry backoff is
//! `min(5 * 2^attempts, 60)` minutes; items become terminally `FAILED` once
//! the attempt budget is exhausted.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::contracts::admin::DlqStatsResponse;
use crate::models::{dlq_backoff_minutes, DlqItem, DlqStatus};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
const FIRST_RETRY_DELAY_MINUTES: i64 = 5;

/// Insert a failed work item.
pub async fn push(
    pool: &PgPool,
    tenant: &str,
    payload: &JsonValue,
    error_class: &str,
    error_message: &str,
    stack_trace: Option<&str>,
    correlation_id: Option<&str>,
    source_operation: Option<&str>,
    max_attempts: i32,
) -> Result<DlqItem, sqlx::Error> {
    let next_retry = Utc::now() + Duration::minutes(FIRST_RETRY_DELAY_MINUTES);

    sqlx::query_as::<_, DlqItem>(
        r#"
        INSERT INTO dlq
            (tenant, payload, error_class, error_message, stack_trace,
             attempts, max_attempts, next_retry_at, status, correlation_id, source_operation)
        VALUES ($1, $2, $3, $4, $5, 0, $6, $7, 'PENDING', $8, $9)
        RETURNING *
        "#,
    )
    .bind(tenant)
    .bind(payload)
    .bind(error_class)
    .bind(error_message)
    .bind(stack_trace)
    .bind(max_attempts)
    .bind(next_retry)
    .bind(correlation_id)
    .bind(source_operation)
    .fetch_one(pool)
    .await
}

/// Fetch up to `limit` pending items due for retry, oldest first.
pub async fn fetch_due(
    pool: &PgPool,
    limit: i64,
    tenant: Option<&str>,
) -> Result<Vec<DlqItem>, sqlx::Error> {
    sqlx::query_as::<_, DlqItem>(
        r#"
        SELECT * FROM dlq
        WHERE status = 'PENDING'
          AND attempts < max_attempts
          AND next_retry_at <= NOW()
          AND ($2::text IS NULL OR tenant = $2)
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .bind(tenant)
    .fetch_all(pool)
    .await
}

/// Record the outcome of one replay attempt and advance the item's state.
pub async fn mark_attempt(
    pool: &PgPool,
    item: &DlqItem,
    success: bool,
    error_message: Option<&str>,
) -> Result<DlqItem, sqlx::Error> {
    if success {
        return sqlx::query_as::<_, DlqItem>(
            r#"
            UPDATE dlq SET
                status = 'PROCESSED',
                processed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(item.id)
        .fetch_one(pool)
        .await;
    }

    let attempts = item.attempts + 1;
    let (status, next_retry_at) = if attempts >= item.max_attempts {
        (DlqStatus::Failed, None)
    } else {
        let backoff = Duration::minutes(dlq_backoff_minutes(attempts));
        (DlqStatus::Pending, Some(Utc::now() + backoff))
    };

    sqlx::query_as::<_, DlqItem>(
        r#"
        UPDATE dlq SET
            attempts = $2,
            status = $3,
            next_retry_at = $4,
            error_message = COALESCE($5, error_message),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(item.id)
    .bind(attempts)
    .bind(status.as_str())
    .bind(next_retry_at)
    .bind(error_message)
    .fetch_one(pool)
    .await
}

/// Queue statistics, optionally scoped to one tenant.
pub async fn stats(
    pool: &PgPool,
    tenant: Option<&str>,
) -> Result<DlqStatsResponse, sqlx::Error> {
    let (pending, processed, failed): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'PENDING'),
            COUNT(*) FILTER (WHERE status = 'PROCESSED'),
            COUNT(*) FILTER (WHERE status = 'FAILED')
        FROM dlq
        WHERE ($1::text IS NULL OR tenant = $1)
        "#,
    )
    .bind(tenant)
    .fetch_one(pool)
    .await?;

    let by_operation_rows: Vec<(Option<String>, i64)> = sqlx::query_as(
        r#"
        SELECT source_operation, COUNT(*) FROM dlq
        WHERE ($1::text IS NULL OR tenant = $1)
        GROUP BY source_operation
        "#,
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let by_operation: BTreeMap<String, i64> = by_operation_rows
        .into_iter()
        .map(|(op, count)| (op.unwrap_or_else(|| "unknown".to_string()), count))
        .collect();

    Ok(DlqStatsResponse {
        pending,
        processed,
        failed,
        total: pending + processed + failed,
        by_operation,
    })
}

/// Physically delete terminal rows older than `days_old`.
pub async fn cleanup(
    pool: &PgPool,
    days_old: i64,
    tenant: Option<&str>,
) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(days_old);

    let result = sqlx::query(
        r#"
        DELETE FROM dlq
        WHERE status IN ('PROCESSED', 'FAILED')
          AND updated_at < $1
          AND ($2::text IS NULL OR tenant = $2)
        "#,
    )
    .bind(cutoff)
    .bind(tenant)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Current pending depth per tenant, for the gauge metric.
pub async fn pending_depth(pool: &PgPool, tenant: &str) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM dlq WHERE tenant = $1 AND status = 'PENDING'"#,
    )
    .bind(tenant)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
