//! # Resilience Kernel
//!
//! Shared runtime protection for outbound dependencies (database, cache,
//! AI provider): circuit breakers, rate limiters, retry decorators, and
//! dependency health checks.
//!
//! ## Why This Lives in Tier 1
//!
//! Every module that talks to an external dependency needs the same guard
//! rails. Placing them in `platform/` keeps modules free of copy-pasted
//! breaker state machines and gives operators one registry to inspect and
//! reset.
//!
//! ## Usage
//!
//! ```rust
//! use resilience::{breaker, CircuitBreakerConfig, with_circuit_breaker};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cb = breaker("ai_service", CircuitBreakerConfig::default()).await;
//!
//! let outcome = with_circuit_breaker(&cb, async {
//!     Ok::<_, String>("response")
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod health;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{
    with_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
    CircuitState,
};
pub use health::{HealthChecker, HealthStatus, ServiceHealth, SystemHealth};
pub use rate_limit::{SlidingWindowLimiter, TokenBucket};
pub use retry::{retry_all_errors, retry_with_backoff, RetryConfig};

use std::time::Duration;

/// Errors produced by the resilience primitives themselves
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit breaker for '{service}' is open")]
    CircuitOpen { service: String },

    #[error("rate limit exceeded for '{key}'")]
    RateLimited { key: String, retry_after: Duration },
}

/// Process-wide circuit breaker registry keyed by service name.
pub mod registry {
    use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
    use dashmap::DashMap;
    use once_cell::sync::Lazy;

    static BREAKERS: Lazy<DashMap<String, CircuitBreaker>> = Lazy::new(DashMap::new);

    /// Get or create the breaker for `service`. The configuration is applied
    /// only on first creation; later callers share the existing breaker.
    pub fn get_or_create(service: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
        BREAKERS
            .entry(service.to_string())
            .or_insert_with(|| CircuitBreaker::new(service, config))
            .clone()
    }

    /// Look up an existing breaker without creating one.
    pub fn get(service: &str) -> Option<CircuitBreaker> {
        BREAKERS.get(service).map(|entry| entry.clone())
    }

    /// Snapshots of every registered breaker, for the admin surface.
    pub async fn snapshots() -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<CircuitBreaker> =
            BREAKERS.iter().map(|entry| entry.value().clone()).collect();

        let mut out = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            out.push(breaker.snapshot().await);
        }
        out
    }

    /// Names of breakers currently in the OPEN state.
    pub async fn open_breakers() -> Vec<String> {
        let breakers: Vec<CircuitBreaker> =
            BREAKERS.iter().map(|entry| entry.value().clone()).collect();

        let mut open = Vec::new();
        for breaker in breakers {
            if breaker.is_open().await {
                open.push(breaker.name().to_string());
            }
        }
        open
    }

    /// Reset one breaker to Closed. Returns false when the name is unknown.
    pub async fn reset(service: &str) -> bool {
        match get(service) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }
}

/// Convenience wrapper: get-or-create a registry breaker.
pub async fn breaker(service: &str, config: CircuitBreakerConfig) -> CircuitBreaker {
    registry::get_or_create(service, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_returns_same_breaker_for_same_name() {
        let a = registry::get_or_create("registry-test-db", CircuitBreakerConfig::default());
        let b = registry::get_or_create("registry-test-db", CircuitBreakerConfig::default());

        a.record_failure().await;
        assert_eq!(b.failure_count().await, 1);
    }

    #[tokio::test]
    async fn registry_reset_by_name() {
        let cb = registry::get_or_create(
            "registry-test-reset",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: std::time::Duration::from_secs(60),
            },
        );
        cb.record_failure().await;
        assert!(cb.is_open().await);

        assert!(registry::reset("registry-test-reset").await);
        assert!(!cb.is_open().await);

        assert!(!registry::reset("registry-test-unknown").await);
    }

    #[tokio::test]
    async fn open_breakers_lists_only_open() {
        let cb = registry::get_or_create(
            "registry-test-open",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: std::time::Duration::from_secs(60),
            },
        );
        cb.record_failure().await;

        let open = registry::open_breakers().await;
        assert!(open.contains(&"registry-test-open".to_string()));

        cb.reset().await;
        let open = registry::open_breakers().await;
        assert!(!open.contains(&"registry-test-open".to_string()));
    }
}
