//! Exception store access
//!
//! At most one OPEN exception per `(tenant, order_id, reason_code)`; a
//! partial unique index backs the upsert. All reads and writes are
//! tenant-scoped.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::contracts::exceptions_api::{ExceptionFilters, ExceptionStatsSummary};
use crate::models::{ExceptionRecord, ExceptionSeverity, ExceptionStatus};
use crate::reason_codes::ReasonCode;

/// Upsert an open exception for a detected breach/problem.
///
/// When an identical open exception already exists, only `context_data` and
/// `updated_at` are refreshed. Returns the row plus whether it was created.
pub async fn upsert_open(
    pool: &PgPool,
    tenant: &str,
    order_id: &str,
    reason_code: ReasonCode,
    severity: ExceptionSeverity,
    context_data: &JsonValue,
    correlation_id: Option<&str>,
    max_resolution_attempts: i32,
) -> Result<(ExceptionRecord, bool), sqlx::Error> {
    let row = sqlx::query_as::<_, ExceptionRecord>(
        r#"
        INSERT INTO exceptions
            (tenant, order_id, reason_code, status, severity, context_data,
             correlation_id, max_resolution_attempts)
        VALUES ($1, $2, $3, 'OPEN', $4, $5, $6, $7)
        ON CONFLICT (tenant, order_id, reason_code) WHERE status = 'OPEN'
        DO UPDATE SET
            context_data = EXCLUDED.context_data,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(tenant)
    .bind(order_id)
    .bind(reason_code.as_str())
    .bind(severity.as_str())
    .bind(context_data)
    .bind(correlation_id)
    .bind(max_resolution_attempts)
    .fetch_one(pool)
    .await?;

    // Freshly inserted rows share one statement timestamp; the conflict
    // branch bumps updated_at in a later transaction.
    let created = row.created_at == row.updated_at;

    Ok((row, created))
}

/// Fetch one exception scoped by tenant. Cross-tenant ids come back as
/// `None`, which the API surfaces as 404.
pub async fn get(
    pool: &PgPool,
    tenant: &str,
    id: i64,
) -> Result<Option<ExceptionRecord>, sqlx::Error> {
    sqlx::query_as::<_, ExceptionRecord>(
        r#"SELECT * FROM exceptions WHERE tenant = $1 AND id = $2"#,
    )
    .bind(tenant)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Filtered, paginated listing plus total count.
pub async fn list(
    pool: &PgPool,
    tenant: &str,
    filters: &ExceptionFilters,
) -> Result<(Vec<ExceptionRecord>, i64), sqlx::Error> {
    let status = filters.status.map(|s| s.as_str().to_string());
    let reason_code = filters.reason_code.map(|r| r.as_str().to_string());
    let severity = filters.severity.map(|s| s.as_str().to_string());
    let offset = (filters.page - 1) * filters.page_size;

    let items = sqlx::query_as::<_, ExceptionRecord>(
        r#"
        SELECT * FROM exceptions
        WHERE tenant = $1
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR reason_code = $3)
          AND ($4::text IS NULL OR severity = $4)
          AND ($5::text IS NULL OR order_id = $5)
        ORDER BY created_at DESC, id DESC
        LIMIT $6 OFFSET $7
        "#,
    )
    .bind(tenant)
    .bind(&status)
    .bind(&reason_code)
    .bind(&severity)
    .bind(&filters.order_id)
    .bind(filters.page_size)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM exceptions
        WHERE tenant = $1
          AND ($2::text IS NULL OR status = $2)
          AND ($3::text IS NULL OR reason_code = $3)
          AND ($4::text IS NULL OR severity = $4)
          AND ($5::text IS NULL OR order_id = $5)
        "#,
    )
    .bind(tenant)
    .bind(&status)
    .bind(&reason_code)
    .bind(&severity)
    .bind(&filters.order_id)
    .fetch_one(pool)
    .await?;

    Ok((items, total))
}

/// Aggregate counts for the stats endpoint. All aggregates are tenant-scoped.
pub async fn stats(pool: &PgPool, tenant: &str) -> Result<ExceptionStatsSummary, sqlx::Error> {
    let by_status_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"SELECT status, COUNT(*) FROM exceptions WHERE tenant = $1 GROUP BY status"#,
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let by_severity_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"SELECT severity, COUNT(*) FROM exceptions WHERE tenant = $1 GROUP BY severity"#,
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let by_reason_rows: Vec<(String, i64)> = sqlx::query_as(
        r#"SELECT reason_code, COUNT(*) FROM exceptions WHERE tenant = $1 GROUP BY reason_code"#,
    )
    .bind(tenant)
    .fetch_all(pool)
    .await?;

    let (blocked,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM exceptions WHERE tenant = $1 AND resolution_blocked"#,
    )
    .bind(tenant)
    .fetch_one(pool)
    .await?;

    let by_status: BTreeMap<String, i64> = by_status_rows.into_iter().collect();
    let total = by_status.values().sum();

    Ok(ExceptionStatsSummary {
        total,
        by_status,
        by_severity: by_severity_rows.into_iter().collect(),
        by_reason_code: by_reason_rows.into_iter().collect(),
        resolution_blocked: blocked,
    })
}

/// Persist a lifecycle change (status, severity, notes, resolution tracking).
///
/// The caller validates the transition; this only writes the row back.
pub async fn save_lifecycle(
    pool: &PgPool,
    record: &ExceptionRecord,
) -> Result<ExceptionRecord, sqlx::Error> {
    sqlx::query_as::<_, ExceptionRecord>(
        r#"
        UPDATE exceptions SET
            status = $3,
            severity = $4,
            ops_note = $5,
            client_note = $6,
            resolution_attempts = $7,
            last_resolution_attempt_at = $8,
            resolution_blocked = $9,
            resolution_block_reason = $10,
            resolved_at = $11,
            updated_at = NOW()
        WHERE tenant = $1 AND id = $2
        RETURNING *
        "#,
    )
    .bind(&record.tenant)
    .bind(record.id)
    .bind(&record.status)
    .bind(&record.severity)
    .bind(&record.ops_note)
    .bind(&record.client_note)
    .bind(record.resolution_attempts)
    .bind(record.last_resolution_attempt_at)
    .bind(record.resolution_blocked)
    .bind(&record.resolution_block_reason)
    .bind(record.resolved_at)
    .fetch_one(pool)
    .await
}

/// Write AI classification results.
pub async fn set_ai_analysis(
    pool: &PgPool,
    tenant: &str,
    id: i64,
    ai_label: Option<&str>,
    ai_confidence: Option<f64>,
    ops_note: &str,
    client_note: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE exceptions SET
            ai_label = $3,
            ai_confidence = $4,
            ops_note = $5,
            client_note = $6,
            updated_at = NOW()
        WHERE tenant = $1 AND id = $2
        "#,
    )
    .bind(tenant)
    .bind(id)
    .bind(ai_label)
    .bind(ai_confidence)
    .bind(ops_note)
    .bind(client_note)
    .execute(pool)
    .await?;
    Ok(())
}

/// Apply a status transition timestamp policy: entering RESOLVED/CLOSED sets
/// `resolved_at` once; leaving that pair clears it.
pub fn apply_status_change(
    record: &mut ExceptionRecord,
    to: ExceptionStatus,
    now: DateTime<Utc>,
) {
    record.status = to.as_str().to_string();
    if to.is_terminal_like() {
        if record.resolved_at.is_none() {
            record.resolved_at = Some(now);
        }
    } else {
        record.resolved_at = None;
    }
}
