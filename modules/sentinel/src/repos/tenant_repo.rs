//! Tenant configuration access

use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::Tenant;

pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<Tenant>, sqlx::Error> {
    sqlx::query_as::<_, Tenant>(r#"SELECT * FROM tenants WHERE name = $1"#)
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Tenant SLA configuration blob, when one is stored.
pub async fn sla_config(pool: &PgPool, name: &str) -> Result<Option<JsonValue>, sqlx::Error> {
    let row: Option<(Option<JsonValue>,)> =
        sqlx::query_as(r#"SELECT sla_config FROM tenants WHERE name = $1"#)
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(config,)| config))
}

/// Tenant billing configuration blob, when one is stored.
pub async fn billing_config(pool: &PgPool, name: &str) -> Result<Option<JsonValue>, sqlx::Error> {
    let row: Option<(Option<JsonValue>,)> =
        sqlx::query_as(r#"SELECT billing_config FROM tenants WHERE name = $1"#)
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(config,)| config))
}

/// Create or update a tenant. Used by provisioning tooling and test setup;
/// tenants are otherwise created out-of-band.
pub async fn upsert(
    pool: &PgPool,
    name: &str,
    display_name: Option<&str>,
    sla_config: Option<&JsonValue>,
) -> Result<Tenant, sqlx::Error> {
    sqlx::query_as::<_, Tenant>(
        r#"
        INSERT INTO tenants (name, display_name, sla_config)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET
            display_name = COALESCE(EXCLUDED.display_name, tenants.display_name),
            sla_config = COALESCE(EXCLUDED.sla_config, tenants.sla_config),
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(name)
    .bind(display_name)
    .bind(sla_config)
    .fetch_one(pool)
    .await
}
