//! Event store access
//!
//! Append-only log of order events. The database unique constraint on
//! `(tenant, source, event_id)` is the source of truth for duplicate
//! suppression; inserts use `ON CONFLICT DO NOTHING` and report whether a
//! row was actually written.

use chrono::{Duration, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::contracts::ingest::ValidatedEvent;
use crate::models::OrderEvent;

/// Insert one event. Returns `None` when the unique constraint suppressed a
/// duplicate.
pub async fn insert_event(
    pool: &PgPool,
    tenant: &str,
    event: &ValidatedEvent,
    correlation_id: Option<&str>,
) -> Result<Option<OrderEvent>, sqlx::Error> {
    sqlx::query_as::<_, OrderEvent>(
        r#"
        INSERT INTO order_events
            (tenant, source, event_type, event_id, order_id, occurred_at, payload, correlation_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (tenant, source, event_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(tenant)
    .bind(event.source.as_str())
    .bind(&event.event_type)
    .bind(&event.event_id)
    .bind(&event.order_id)
    .bind(event.occurred_at)
    .bind(&event.raw)
    .bind(correlation_id)
    .fetch_optional(pool)
    .await
}

/// Bulk-insert a de-duplicated batch inside one transaction.
///
/// Returns the `event_id`s of rows actually written; conflicting rows are
/// silently skipped.
pub async fn insert_events_bulk(
    tx: &mut Transaction<'_, Postgres>,
    tenant: &str,
    events: &[ValidatedEvent],
    correlation_id: Option<&str>,
) -> Result<Vec<String>, sqlx::Error> {
    let mut inserted = Vec::with_capacity(events.len());

    for event in events {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO order_events
                (tenant, source, event_type, event_id, order_id, occurred_at, payload, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant, source, event_id) DO NOTHING
            RETURNING event_id
            "#,
        )
        .bind(tenant)
        .bind(event.source.as_str())
        .bind(&event.event_type)
        .bind(&event.event_id)
        .bind(&event.order_id)
        .bind(event.occurred_at)
        .bind(&event.raw)
        .bind(correlation_id)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some((event_id,)) = row {
            inserted.push(event_id);
        }
    }

    Ok(inserted)
}

/// Ordered event timeline for one order.
pub async fn list_order_timeline(
    pool: &PgPool,
    tenant: &str,
    order_id: &str,
) -> Result<Vec<OrderEvent>, sqlx::Error> {
    sqlx::query_as::<_, OrderEvent>(
        r#"
        SELECT * FROM order_events
        WHERE tenant = $1 AND order_id = $2
        ORDER BY occurred_at ASC, id ASC
        "#,
    )
    .bind(tenant)
    .bind(order_id)
    .fetch_all(pool)
    .await
}

/// Distinct orders seen for the tenant in the last hour. Drives the
/// high-volume SLA multiplier.
pub async fn rolling_hourly_order_count(
    pool: &PgPool,
    tenant: &str,
) -> Result<i64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::hours(1);
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(DISTINCT order_id) FROM order_events
        WHERE tenant = $1 AND created_at >= $2
        "#,
    )
    .bind(tenant)
    .bind(cutoff)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
