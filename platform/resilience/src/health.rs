//! Dependency health checks
//!
//! Each dependency registers an async probe. Results are cached briefly so
//! that liveness/readiness endpoints and the monitoring loop do not hammer
//! the dependencies themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::registry;

/// Health status of a single dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

/// Result of probing one dependency
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: HealthStatus,
    /// Probe round-trip in milliseconds
    pub response_time_ms: Option<u64>,
    pub error_message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ServiceHealth {
    pub fn healthy(service: impl Into<String>, response_time: Duration) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time.as_millis() as u64),
            error_message: None,
            last_check: Utc::now(),
        }
    }

    pub fn degraded(service: impl Into<String>, response_time: Duration, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Degraded,
            response_time_ms: Some(response_time.as_millis() as u64),
            error_message: Some(message.into()),
            last_check: Utc::now(),
        }
    }

    pub fn unhealthy(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            error_message: Some(message.into()),
            last_check: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

type ProbeFn = Arc<dyn Fn() -> BoxFuture<'static, ServiceHealth> + Send + Sync>;

struct RegisteredCheck {
    probe: ProbeFn,
    critical: bool,
}

struct CachedResult {
    health: ServiceHealth,
    checked_at: Instant,
}

/// Aggregated view over all registered dependencies
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_healthy: bool,
    pub services: HashMap<String, ServiceHealth>,
    pub open_circuit_breakers: Vec<String>,
}

/// Registry of dependency probes with short-lived result caching.
pub struct HealthChecker {
    checks: RwLock<HashMap<String, RegisteredCheck>>,
    cache: RwLock<HashMap<String, CachedResult>>,
    cache_ttl: Duration,
}

impl HealthChecker {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            checks: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Register a probe. `critical` dependencies gate overall health and
    /// readiness; non-critical ones are reported but do not flip readiness.
    pub async fn register<F>(&self, service: impl Into<String>, critical: bool, probe: F)
    where
        F: Fn() -> BoxFuture<'static, ServiceHealth> + Send + Sync + 'static,
    {
        let mut checks = self.checks.write().await;
        checks.insert(
            service.into(),
            RegisteredCheck {
                probe: Arc::new(probe),
                critical,
            },
        );
    }

    /// Probe one service, honoring the cache unless `force` is set.
    pub async fn check_service(&self, service: &str, force: bool) -> Option<ServiceHealth> {
        if !force {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(service) {
                if cached.checked_at.elapsed() < self.cache_ttl {
                    return Some(cached.health.clone());
                }
            }
        }

        let probe = {
            let checks = self.checks.read().await;
            checks.get(service).map(|c| c.probe.clone())?
        };

        let health = probe().await;
        if !health.is_healthy() {
            warn!(
                service = %health.service,
                status = health.status.as_str(),
                error = health.error_message.as_deref().unwrap_or("none"),
                "dependency health check not healthy"
            );
        }

        let mut cache = self.cache.write().await;
        cache.insert(
            service.to_string(),
            CachedResult {
                health: health.clone(),
                checked_at: Instant::now(),
            },
        );

        Some(health)
    }

    /// Probe every registered service.
    pub async fn check_all(&self, force: bool) -> HashMap<String, ServiceHealth> {
        let names: Vec<String> = {
            let checks = self.checks.read().await;
            checks.keys().cloned().collect()
        };

        let mut results = HashMap::with_capacity(names.len());
        for name in names {
            if let Some(health) = self.check_service(&name, force).await {
                results.insert(name, health);
            }
        }
        results
    }

    /// Overall system health: every critical dependency healthy and no
    /// circuit breaker open.
    pub async fn system_health(&self, force: bool) -> SystemHealth {
        let services = self.check_all(force).await;

        let critical: Vec<String> = {
            let checks = self.checks.read().await;
            checks
                .iter()
                .filter(|(_, c)| c.critical)
                .map(|(name, _)| name.clone())
                .collect()
        };

        let critical_healthy = critical
            .iter()
            .all(|name| services.get(name).map(ServiceHealth::is_healthy).unwrap_or(false));

        let open_circuit_breakers = registry::open_breakers().await;

        SystemHealth {
            overall_healthy: critical_healthy && open_circuit_breakers.is_empty(),
            services,
            open_circuit_breakers,
        }
    }

    /// Services currently degraded or unhealthy, for the monitoring loop.
    pub async fn degraded_services(&self) -> Vec<ServiceHealth> {
        let services = self.check_all(false).await;
        services
            .into_values()
            .filter(|h| !h.is_healthy())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always_healthy(service: &'static str) -> impl Fn() -> BoxFuture<'static, ServiceHealth> {
        move || {
            Box::pin(async move { ServiceHealth::healthy(service, Duration::from_millis(1)) })
        }
    }

    #[tokio::test]
    async fn reports_registered_services() {
        let checker = HealthChecker::new(Duration::from_secs(10));
        checker.register("database", true, always_healthy("database")).await;
        checker.register("redis", true, always_healthy("redis")).await;

        let all = checker.check_all(true).await;
        assert_eq!(all.len(), 2);
        assert!(all["database"].is_healthy());
    }

    #[tokio::test]
    async fn caches_results_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let checker = HealthChecker::new(Duration::from_secs(60));
        checker
            .register("database", true, move || {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ServiceHealth::healthy("database", Duration::from_millis(1))
                })
            })
            .await;

        checker.check_service("database", false).await;
        checker.check_service("database", false).await;
        checker.check_service("database", false).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_bypasses_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let checker = HealthChecker::new(Duration::from_secs(60));
        checker
            .register("redis", true, move || {
                let calls = calls_clone.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ServiceHealth::healthy("redis", Duration::from_millis(1))
                })
            })
            .await;

        checker.check_service("redis", true).await;
        checker.check_service("redis", true).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unhealthy_critical_service_fails_system_health() {
        let checker = HealthChecker::new(Duration::from_secs(10));
        checker.register("database", true, always_healthy("database")).await;
        checker
            .register("redis", true, || {
                Box::pin(async { ServiceHealth::unhealthy("redis", "connection refused") })
            })
            .await;

        let system = checker.system_health(true).await;
        assert!(!system.overall_healthy);
    }

    #[tokio::test]
    async fn unhealthy_non_critical_service_keeps_system_healthy() {
        let checker = HealthChecker::new(Duration::from_secs(10));
        checker.register("database", true, always_healthy("database")).await;
        checker
            .register("ai_service", false, || {
                Box::pin(async { ServiceHealth::unhealthy("ai_service", "budget exhausted") })
            })
            .await;

        let system = checker.system_health(true).await;
        assert!(system.overall_healthy);

        let degraded = checker.degraded_services().await;
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].service, "ai_service");
    }
}
