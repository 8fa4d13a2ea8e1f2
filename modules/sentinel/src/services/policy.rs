//! Tenant policy store
//!
//! Read-through cached access to per-tenant SLA thresholds. Tenants without
//! a stored configuration get the platform defaults; stored configurations
//! overlay the defaults field by field, so partial configs are valid.

use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::debug;

use crate::repos::tenant_repo;

const POLICY_CACHE_TTL: Duration = Duration::from_secs(300);

/// SLA thresholds and multiplier conditions for one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaPolicy {
    /// Minutes from order_paid to pick_completed
    pub pick_minutes: i64,
    /// Minutes from pick_completed to pack_completed
    pub pack_minutes: i64,
    /// Minutes from pack_completed to ship_label_printed
    pub ship_minutes: i64,
    /// Business days from carrier pickup to delivery
    pub carrier_delivery_days: i64,

    pub weekend_multiplier: f64,
    pub holiday_multiplier: f64,
    /// Orders per rolling hour above which the high-volume multiplier kicks in
    pub high_volume_threshold: i64,
    pub high_volume_multiplier: f64,
    /// ISO dates treated as holidays for this tenant
    #[serde(default)]
    pub holiday_dates: Vec<NaiveDate>,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            pick_minutes: 120,
            pack_minutes: 180,
            ship_minutes: 1440,
            carrier_delivery_days: 5,
            weekend_multiplier: 1.5,
            holiday_multiplier: 2.0,
            high_volume_threshold: 100,
            high_volume_multiplier: 1.3,
            holiday_dates: Vec::new(),
        }
    }
}

impl SlaPolicy {
    /// Overlay a stored tenant configuration onto the defaults. Unknown keys
    /// are ignored; malformed values fall back to the default field.
    pub fn from_overlay(config: &JsonValue) -> Self {
        let mut policy = SlaPolicy::default();

        let get_i64 = |key: &str| config.get(key).and_then(JsonValue::as_i64);
        let get_f64 = |key: &str| config.get(key).and_then(JsonValue::as_f64);

        if let Some(v) = get_i64("pick_minutes") {
            policy.pick_minutes = v;
        }
        if let Some(v) = get_i64("pack_minutes") {
            policy.pack_minutes = v;
        }
        if let Some(v) = get_i64("ship_minutes") {
            policy.ship_minutes = v;
        }
        if let Some(v) = get_i64("carrier_delivery_days") {
            policy.carrier_delivery_days = v;
        }
        if let Some(v) = get_f64("weekend_multiplier") {
            policy.weekend_multiplier = v;
        }
        if let Some(v) = get_f64("holiday_multiplier") {
            policy.holiday_multiplier = v;
        }
        if let Some(v) = get_i64("high_volume_threshold") {
            policy.high_volume_threshold = v;
        }
        if let Some(v) = get_f64("high_volume_multiplier") {
            policy.high_volume_multiplier = v;
        }
        if let Some(dates) = config.get("holiday_dates").and_then(JsonValue::as_array) {
            policy.holiday_dates = dates
                .iter()
                .filter_map(JsonValue::as_str)
                .filter_map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .collect();
        }

        policy
    }

    /// Required fields must be positive for the policy to be usable.
    pub fn is_valid(&self) -> bool {
        self.pick_minutes > 0 && self.pack_minutes > 0 && self.ship_minutes > 0
    }

    /// Composite threshold multiplier for the evaluation instant.
    ///
    /// Weekend, holiday, and high-volume conditions compose multiplicatively;
    /// absent conditions contribute 1.0.
    pub fn threshold_multiplier(&self, now: DateTime<Utc>, hourly_order_count: i64) -> f64 {
        let mut multiplier = 1.0;

        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            multiplier *= self.weekend_multiplier;
        }
        if self.holiday_dates.contains(&now.date_naive()) {
            multiplier *= self.holiday_multiplier;
        }
        if hourly_order_count > self.high_volume_threshold {
            multiplier *= self.high_volume_multiplier;
        }

        multiplier
    }
}

/// Per-operation billing rates for one tenant. Invoice arithmetic lives
/// elsewhere; this is the tenant-scoped rate card it reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingPolicy {
    pub pick_fee_cents: i64,
    pub pack_fee_cents: i64,
    pub label_fee_cents: i64,
    pub storage_fee_cents_per_day: i64,
    pub min_order_fee_cents: i64,
    pub rush_multiplier: f64,
    pub oversized_multiplier: f64,
    pub hazmat_multiplier: f64,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            pick_fee_cents: 30,
            pack_fee_cents: 20,
            label_fee_cents: 15,
            storage_fee_cents_per_day: 5,
            min_order_fee_cents: 50,
            rush_multiplier: 2.0,
            oversized_multiplier: 1.5,
            hazmat_multiplier: 3.0,
        }
    }
}

impl BillingPolicy {
    pub fn from_overlay(config: &JsonValue) -> Self {
        let mut policy = BillingPolicy::default();

        let get_i64 = |key: &str| config.get(key).and_then(JsonValue::as_i64);
        let get_f64 = |key: &str| config.get(key).and_then(JsonValue::as_f64);

        if let Some(v) = get_i64("pick_fee_cents") {
            policy.pick_fee_cents = v;
        }
        if let Some(v) = get_i64("pack_fee_cents") {
            policy.pack_fee_cents = v;
        }
        if let Some(v) = get_i64("label_fee_cents") {
            policy.label_fee_cents = v;
        }
        if let Some(v) = get_i64("storage_fee_cents_per_day") {
            policy.storage_fee_cents_per_day = v;
        }
        if let Some(v) = get_i64("min_order_fee_cents") {
            policy.min_order_fee_cents = v;
        }
        if let Some(v) = get_f64("rush_multiplier") {
            policy.rush_multiplier = v;
        }
        if let Some(v) = get_f64("oversized_multiplier") {
            policy.oversized_multiplier = v;
        }
        if let Some(v) = get_f64("hazmat_multiplier") {
            policy.hazmat_multiplier = v;
        }

        policy
    }

    pub fn is_valid(&self) -> bool {
        self.pick_fee_cents >= 0 && self.pack_fee_cents >= 0 && self.label_fee_cents >= 0
    }
}

/// Process-local, read-mostly cache over tenant SLA and billing
/// configurations.
pub struct PolicyStore {
    cache: DashMap<String, (Instant, SlaPolicy)>,
    billing_cache: DashMap<String, (Instant, BillingPolicy)>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            billing_cache: DashMap::new(),
        }
    }

    /// Fetch the SLA policy for a tenant, hitting the database only on cache
    /// miss or expiry. A missing or invalid stored config yields defaults.
    pub async fn sla_policy(&self, pool: &PgPool, tenant: &str) -> Result<SlaPolicy, sqlx::Error> {
        if let Some(entry) = self.cache.get(tenant) {
            let (cached_at, policy) = entry.value();
            if cached_at.elapsed() < POLICY_CACHE_TTL {
                return Ok(policy.clone());
            }
        }

        let policy = match tenant_repo::sla_config(pool, tenant).await? {
            Some(config) => {
                let overlaid = SlaPolicy::from_overlay(&config);
                if overlaid.is_valid() {
                    overlaid
                } else {
                    debug!(tenant, "stored SLA config invalid, using defaults");
                    SlaPolicy::default()
                }
            }
            None => SlaPolicy::default(),
        };

        self.cache
            .insert(tenant.to_string(), (Instant::now(), policy.clone()));
        Ok(policy)
    }

    /// Fetch the billing rate card for a tenant, defaults when unset.
    pub async fn billing_policy(
        &self,
        pool: &PgPool,
        tenant: &str,
    ) -> Result<BillingPolicy, sqlx::Error> {
        if let Some(entry) = self.billing_cache.get(tenant) {
            let (cached_at, policy) = entry.value();
            if cached_at.elapsed() < POLICY_CACHE_TTL {
                return Ok(policy.clone());
            }
        }

        let policy = match tenant_repo::billing_config(pool, tenant).await? {
            Some(config) => {
                let overlaid = BillingPolicy::from_overlay(&config);
                if overlaid.is_valid() {
                    overlaid
                } else {
                    debug!(tenant, "stored billing config invalid, using defaults");
                    BillingPolicy::default()
                }
            }
            None => BillingPolicy::default(),
        };

        self.billing_cache
            .insert(tenant.to_string(), (Instant::now(), policy.clone()));
        Ok(policy)
    }

    /// Invalidate everything (operator cache-clear).
    pub fn clear(&self) {
        self.cache.clear();
        self.billing_cache.clear();
    }

    pub fn cached_tenants(&self) -> usize {
        self.cache.len()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
