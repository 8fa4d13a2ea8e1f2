//! Rate limiting primitives
//!
//! Two variants:
//!
//! - [`SlidingWindowLimiter`]: per-key request counter over a sliding time
//!   window. Rejects the (N+1)-th request in any window; capacity is restored
//!   as the window slides past the oldest request. No burst allowance.
//! - [`TokenBucket`]: classic token bucket for rates that must tolerate
//!   bursts (DLQ replay, background drains).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::ResilienceError;

/// Per-key sliding-window rate limiter.
///
/// Keys are arbitrary strings (tenant id, endpoint, tenant:endpoint pairs).
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    requests: DashMap<String, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: DashMap::new(),
        }
    }

    /// Record a request for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::RateLimited`] when the window for `key`
    /// already holds `max_requests` entries.
    pub fn check(&self, key: &str) -> Result<(), ResilienceError> {
        let now = Instant::now();
        let mut entry = self.requests.entry(key.to_string()).or_default();

        Self::evict_expired(&mut entry, now, self.window);

        if entry.len() < self.max_requests {
            entry.push_back(now);
            Ok(())
        } else {
            let retry_after = entry
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(self.window);

            warn!(key = %key, max = self.max_requests, "rate limit exceeded");
            Err(ResilienceError::RateLimited {
                key: key.to_string(),
                retry_after,
            })
        }
    }

    /// How many requests `key` may still make in the current window.
    pub fn remaining(&self, key: &str) -> usize {
        let now = Instant::now();
        match self.requests.get_mut(key) {
            Some(mut entry) => {
                Self::evict_expired(&mut entry, now, self.window);
                self.max_requests.saturating_sub(entry.len())
            }
            None => self.max_requests,
        }
    }

    /// Drop all recorded requests for `key`.
    pub fn clear(&self, key: &str) {
        self.requests.remove(key);
    }

    /// Number of keys with at least one request inside the window.
    pub fn active_keys(&self) -> usize {
        let now = Instant::now();
        self.requests
            .iter_mut()
            .filter(|entry| {
                entry
                    .iter()
                    .any(|t| now.duration_since(*t) <= self.window)
            })
            .count()
    }

    fn evict_expired(entry: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = entry.front() {
            if now.duration_since(*oldest) > window {
                entry.pop_front();
            } else {
                break;
            }
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket limiter with burst capacity.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `refill_rate` is tokens per second; the bucket starts full.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to consume `tokens` without waiting.
    pub async fn try_acquire(&self, tokens: u32) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        let needed = f64::from(tokens);
        if state.tokens >= needed {
            state.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Consume one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                // Sleep exactly long enough for one token to accumulate.
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_rate)
            };
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn available(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}
