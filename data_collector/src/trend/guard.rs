//! Per-provider call guards: rate limiting, failure breaker, seeded fallback

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::time::Instant;

/// Enforces a minimum delay between two calls to the same provider.
///
/// Callers arriving early wait until the slot is free. The lock is held
/// across the wait so concurrent callers queue up in order.
pub struct RateLimiter {
    min_interval: Duration,
    next_allowed: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut next = self.next_allowed.lock().await;
        if let Some(at) = *next {
            if at > Instant::now() {
                tokio::time::sleep_until(at).await;
            }
        }
        *next = Some(Instant::now() + self.min_interval);
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Disables a provider after a run of consecutive failures.
///
/// Once `reset_after` has passed the next call is let through as a probe:
/// success closes the breaker, another failure re-opens it.
pub struct CircuitBreaker {
    threshold: u32,
    reset_after: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            reset_after,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Whether a real call may be attempted right now.
    pub fn allow(&self) -> bool {
        let state = self.state.lock();
        match state.opened_at {
            None => true,
            Some(opened) => opened.elapsed() >= self.reset_after,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.allow()
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        state.opened_at = None;
    }

    /// Returns true when this failure opened (or re-opened) the breaker.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.opened_at = Some(Instant::now());
            return true;
        }
        false
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }
}

/// Deterministic stand-in for a failed provider call.
///
/// The value is seeded by provider, symbol and hour so repeated failures
/// within the hour agree, lies in `[-range, range]` and is never exactly zero.
pub fn fallback_score(provider: &str, symbol: &str, at: DateTime<Utc>, range: f64) -> f64 {
    let mut hasher = DefaultHasher::new();
    provider.hash(&mut hasher);
    symbol.hash(&mut hasher);
    (at.timestamp() / 3600).hash(&mut hasher);
    let mut rng = StdRng::seed_from_u64(hasher.finish());

    let range = range.abs().max(f64::EPSILON);
    let value: f64 = rng.gen_range(-range..=range);
    let min_magnitude = range * 0.01;
    if value.abs() < min_magnitude {
        if value.is_sign_negative() {
            -min_magnitude
        } else {
            min_magnitude
        }
    } else {
        value
    }
}
