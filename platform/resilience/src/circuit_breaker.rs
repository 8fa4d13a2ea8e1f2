//! Circuit breaker for outbound dependencies
//!
//! Stops calls to a failing service after a run of consecutive failures and
//! probes for recovery after a cooldown.
//!
//! ## States
//!
//! ```text
//! Closed (normal) ──[consecutive failures >= threshold]──> Open (failing)
//!                                                                │
//!                                                                │ [recovery timeout elapsed]
//!                                                                ▼
//!                                                         HalfOpen (probing)
//!                                                                │
//!                          ┌─────────────────────────────────────┴───────────┐
//!                          │                                                 │
//!                   [probe succeeds]                                  [probe fails]
//!                          │                                                 │
//!                          ▼                                                 ▼
//!                       Closed                                             Open
//! ```
//!
//! In `HalfOpen` exactly one in-flight probe is admitted; concurrent callers
//! are rejected until the probe settles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::ResilienceError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - requests allowed
    Closed,
    /// Failing - requests rejected until the recovery timeout elapses
    Open,
    /// Probing recovery - a single test request is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long to stay open before admitting a probe
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker, exposed to the admin/health surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: String,
    pub failure_count: u32,
    pub seconds_since_last_failure: Option<u64>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
}

/// Thread-safe circuit breaker keyed by dependency name.
///
/// Cheap to clone (`Arc` internally); every clone observes the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into().into(),
            config,
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                probe_in_flight: false,
            })),
        }
    }

    /// Check whether a request may proceed.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] when the circuit is open, or
    /// when it is half-open and the single probe slot is already taken.
    pub async fn allow_request(&self) -> Result<(), ResilienceError> {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);

                if elapsed >= self.config.recovery_timeout {
                    info!(breaker = %self.name, "circuit breaker transitioning: Open -> HalfOpen");
                    state.state = CircuitState::HalfOpen;
                    state.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen {
                        service: self.name.to_string(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(ResilienceError::CircuitOpen {
                        service: self.name.to_string(),
                    })
                } else {
                    state.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker transitioning: HalfOpen -> Closed (recovered)");
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.last_failure_time = None;
                state.probe_in_flight = false;
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub async fn record_failure(&self) {
        let mut state = self.state.write().await;

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "circuit breaker transitioning: Closed -> Open"
                    );
                    state.state = CircuitState::Open;
                    state.last_failure_time = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "circuit breaker transitioning: HalfOpen -> Open (probe failed)");
                state.state = CircuitState::Open;
                state.last_failure_time = Some(Instant::now());
                state.probe_in_flight = false;
            }
            CircuitState::Open => {
                state.last_failure_time = Some(Instant::now());
            }
        }
    }

    /// Force the breaker back to `Closed` (operator action).
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        info!(breaker = %self.name, "circuit breaker reset to Closed");
        state.state = CircuitState::Closed;
        state.failure_count = 0;
        state.last_failure_time = None;
        state.probe_in_flight = false;
    }

    pub async fn current_state(&self) -> CircuitState {
        self.state.read().await.state
    }

    pub async fn is_open(&self) -> bool {
        self.state.read().await.state == CircuitState::Open
    }

    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failure_count
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state.read().await;
        CircuitBreakerSnapshot {
            name: self.name.to_string(),
            state: state.state.as_str().to_string(),
            failure_count: state.failure_count,
            seconds_since_last_failure: state.last_failure_time.map(|t| t.elapsed().as_secs()),
        }
    }
}

/// Execute a future behind a circuit breaker.
///
/// Checks the breaker, runs the future, and records the outcome. The caller's
/// error type is preserved; a rejected call surfaces as
/// [`ResilienceError::CircuitOpen`] on the `Err(Ok(_))`-free outer layer.
pub async fn with_circuit_breaker<F, T, E>(
    breaker: &CircuitBreaker,
    f: F,
) -> Result<Result<T, E>, ResilienceError>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    breaker.allow_request().await?;

    match f.await {
        Ok(value) => {
            breaker.record_success().await;
            Ok(Ok(value))
        }
        Err(e) => {
            breaker.record_failure().await;
            Ok(Err(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(threshold: u32, timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn starts_closed_and_allows_requests() {
        let cb = CircuitBreaker::new("test", CircuitBreakerConfig::default());

        assert_eq!(cb.current_state().await, CircuitState::Closed);
        assert!(cb.allow_request().await.is_ok());
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test", fast_config(3, 30_000));

        for _ in 0..3 {
            cb.record_failure().await;
        }

        assert_eq!(cb.current_state().await, CircuitState::Open);
        let err = cb.allow_request().await.unwrap_err();
        assert!(matches!(err, ResilienceError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn open_rejection_is_fast() {
        let cb = CircuitBreaker::new("test", fast_config(1, 30_000));
        cb.record_failure().await;

        let start = Instant::now();
        assert!(cb.allow_request().await.is_err());
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = CircuitBreaker::new("test", fast_config(3, 30_000));

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.failure_count().await, 2);

        cb.record_success().await;
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn admits_single_probe_after_recovery_timeout() {
        let cb = CircuitBreaker::new("test", fast_config(1, 50));
        cb.record_failure().await;
        assert_eq!(cb.current_state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        // First caller gets the probe slot, second is rejected.
        assert!(cb.allow_request().await.is_ok());
        assert_eq!(cb.current_state().await, CircuitState::HalfOpen);
        assert!(cb.allow_request().await.is_err());
    }

    #[tokio::test]
    async fn successful_probe_closes_circuit() {
        let cb = CircuitBreaker::new("test", fast_config(1, 50));
        cb.record_failure().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        cb.allow_request().await.unwrap();
        cb.record_success().await;

        assert_eq!(cb.current_state().await, CircuitState::Closed);
        assert!(cb.allow_request().await.is_ok());
    }

    #[tokio::test]
    async fn failed_probe_reopens_circuit() {
        let cb = CircuitBreaker::new("test", fast_config(1, 50));
        cb.record_failure().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        cb.allow_request().await.unwrap();
        cb.record_failure().await;

        assert_eq!(cb.current_state().await, CircuitState::Open);
        assert!(cb.allow_request().await.is_err());
    }

    #[tokio::test]
    async fn reset_returns_to_closed() {
        let cb = CircuitBreaker::new("test", fast_config(1, 30_000));
        cb.record_failure().await;
        assert!(cb.is_open().await);

        cb.reset().await;
        assert_eq!(cb.current_state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn with_circuit_breaker_records_outcomes() {
        let cb = CircuitBreaker::new("test", fast_config(1, 30_000));

        let ok = with_circuit_breaker(&cb, async { Ok::<_, String>(42) }).await;
        assert_eq!(ok.unwrap().unwrap(), 42);

        let inner_err = with_circuit_breaker(&cb, async { Err::<i32, _>("boom".to_string()) }).await;
        assert!(inner_err.unwrap().is_err());

        // Threshold of 1: the failure above opened the circuit.
        let rejected = with_circuit_breaker(&cb, async { Ok::<_, String>(0) }).await;
        assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn snapshot_reports_state() {
        let cb = CircuitBreaker::new("ai_service", fast_config(1, 30_000));
        cb.record_failure().await;

        let snap = cb.snapshot().await;
        assert_eq!(snap.name, "ai_service");
        assert_eq!(snap.state, "OPEN");
        assert_eq!(snap.failure_count, 1);
    }
}
