//! Per-provider token-bucket rate limiter with exponential backoff.
//!
//! Each provider owns an independent [`RateLimiter`]; there is no shared
//! bucket, so a 429 on one provider never throttles another. FIFO
//! fairness across concurrent `acquire` callers is provided by a
//! `tokio::sync::Semaphore`, which tokio documents as serving permits in
//! request order — the same primitive `walletd_resilience::circuit_breaker`
//! reaches for when it needs ordered access to shared state.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::time::Instant;

/// Tunable parameters for one provider's bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub rps: u32,
    pub burst_size: u32,
    pub min_delay_ms: u64,
    pub backoff_multiplier: u64,
    pub max_backoff_ms: u64,
}

impl RateLimitConfig {
    /// Default sizing derived from `rps` alone.
    pub fn from_rps(rps: u32) -> Self {
        let (burst_size, min_delay_ms) = default_sizing(rps);
        RateLimitConfig {
            rps,
            burst_size,
            min_delay_ms,
            backoff_multiplier: 2,
            max_backoff_ms: 30_000,
        }
    }

    /// Merge `overrides` on top of this config; fields left at `None` in
    /// `overrides` keep their current value.
    pub fn merged(mut self, overrides: RateLimitConfigOverrides) -> Self {
        if let Some(rps) = overrides.rps {
            self.rps = rps;
        }
        if let Some(burst) = overrides.burst_size {
            self.burst_size = burst;
        }
        if let Some(delay) = overrides.min_delay_ms {
            self.min_delay_ms = delay;
        }
        if let Some(mult) = overrides.backoff_multiplier {
            self.backoff_multiplier = mult;
        }
        if let Some(max) = overrides.max_backoff_ms {
            self.max_backoff_ms = max;
        }
        self
    }
}

/// Sparse override set for [`RateLimiter::update_config`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitConfigOverrides {
    pub rps: Option<u32>,
    pub burst_size: Option<u32>,
    pub min_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<u64>,
    pub max_backoff_ms: Option<u64>,
}

fn default_sizing(rps: u32) -> (u32, u64) {
    let rps_f = rps.max(1) as f64;
    if rps <= 3 {
        (1, (1000.0 / rps_f * 1.2).ceil() as u64)
    } else if rps <= 5 {
        (2, (1000.0 / rps_f * 1.2).ceil() as u64)
    } else {
        let burst = 3u32.max((rps_f * 1.5).ceil() as u32);
        (burst, (1000.0 / rps_f * 1.1).ceil() as u64)
    }
}

#[derive(Debug, Clone, Copy)]
struct Inner {
    tokens: f64,
    last_refill_at: Instant,
    /// Separate from `last_refill_at`: when a token was last actually
    /// handed out, for the minimum-spacing floor in step 5. Kept apart so
    /// a refill-driven wait (burst exhaustion) doesn't get an *additional*
    /// `min_delay_ms` tacked on afterwards.
    last_dispensed_at: Option<Instant>,
    current_backoff_ms: u64,
    consecutive_errors: u32,
}

/// Read-only view of the limiter's internal state, for observability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimiterSnapshot {
    pub tokens: f64,
    pub current_backoff_ms: u64,
    pub consecutive_errors: u32,
}

/// Per-provider token bucket. Construct one per resolved provider; never
/// shared across providers.
pub struct RateLimiter {
    config: RwLock<RateLimitConfig>,
    state: Mutex<Inner>,
    /// Serializes and orders concurrent `acquire` callers (the "currently
    /// processing" flag plus FIFO waiter queue).
    admission: Semaphore,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let burst = config.burst_size as f64;
        RateLimiter {
            config: RwLock::new(config),
            state: Mutex::new(Inner {
                tokens: burst,
                last_refill_at: Instant::now(),
                last_dispensed_at: None,
                current_backoff_ms: 0,
                consecutive_errors: 0,
            }),
            admission: Semaphore::new(1),
        }
    }

    pub fn from_rps(rps: u32) -> Self {
        Self::new(RateLimitConfig::from_rps(rps))
    }

    /// Attempt to acquire one token within `timeout`. Never panics or
    /// throws — returns `false` on timeout, matching the "rate limiter
    /// recovers locally" propagation policy.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        let permit = match tokio::time::timeout(timeout, self.admission.acquire()).await {
            Ok(Ok(permit)) => permit,
            _ => return false,
        };

        let mut state = self.state.lock().await;
        let config = *self.config.read().await;

        refill(&mut state, &config);

        if state.current_backoff_ms > 0 {
            // The penalty is paid on every acquire while it's in effect, not
            // just the next one: only `report_success` clears it, so two
            // errors in a row (even across separate acquires) still double.
            let backoff = Duration::from_millis(state.current_backoff_ms);
            drop(state);
            tokio::time::sleep(backoff).await;
            state = self.state.lock().await;
            state.last_refill_at = Instant::now();
        }

        loop {
            if state.tokens >= 1.0 {
                break;
            }
            if Instant::now() >= deadline {
                drop(state);
                drop(permit);
                return false;
            }
            let wait = Duration::from_millis(100).min(Duration::from_millis(config.min_delay_ms));
            drop(state);
            tokio::time::sleep(wait).await;
            state = self.state.lock().await;
            refill(&mut state, &config);
        }

        state.tokens -= 1.0;
        let min_delay = Duration::from_millis(config.min_delay_ms);
        if let Some(last_dispensed) = state.last_dispensed_at {
            let since_dispensed = Instant::now().saturating_duration_since(last_dispensed);
            if since_dispensed < min_delay {
                let remaining = min_delay - since_dispensed;
                drop(state);
                tokio::time::sleep(remaining).await;
                state = self.state.lock().await;
            }
        }
        let now = Instant::now();
        state.last_refill_at = now;
        state.last_dispensed_at = Some(now);
        drop(state);
        drop(permit);
        true
    }

    pub async fn report_success(&self) {
        let mut state = self.state.lock().await;
        state.current_backoff_ms = 0;
        state.consecutive_errors = 0;
    }

    pub async fn report_rate_limit_error(&self) {
        let config = *self.config.read().await;
        let mut state = self.state.lock().await;
        state.consecutive_errors += 1;
        state.current_backoff_ms = if state.current_backoff_ms == 0 {
            config.min_delay_ms * config.backoff_multiplier
        } else {
            (state.current_backoff_ms * config.backoff_multiplier).min(config.max_backoff_ms)
        };
        state.tokens = 0.0;
        state.last_refill_at = Instant::now();
    }

    pub async fn report_error(&self) {
        let config = *self.config.read().await;
        let mut state = self.state.lock().await;
        state.consecutive_errors += 1;
        if state.consecutive_errors >= 3 {
            state.current_backoff_ms = (config.min_delay_ms * state.consecutive_errors as u64)
                .min(config.max_backoff_ms / 2);
        }
    }

    pub async fn update_config(&self, overrides: RateLimitConfigOverrides) {
        let mut config = self.config.write().await;
        *config = config.merged(overrides);
        let mut state = self.state.lock().await;
        if state.tokens > config.burst_size as f64 {
            state.tokens = config.burst_size as f64;
        }
    }

    pub async fn reset(&self) {
        let config = *self.config.read().await;
        let mut state = self.state.lock().await;
        state.tokens = config.burst_size as f64;
        state.last_refill_at = Instant::now();
        state.last_dispensed_at = None;
        state.current_backoff_ms = 0;
        state.consecutive_errors = 0;
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.state.lock().await;
        RateLimiterSnapshot {
            tokens: state.tokens,
            current_backoff_ms: state.current_backoff_ms,
            consecutive_errors: state.consecutive_errors,
        }
    }
}

fn refill(state: &mut Inner, config: &RateLimitConfig) {
    let now = Instant::now();
    let elapsed = now.saturating_duration_since(state.last_refill_at).as_secs_f64();
    state.tokens = (state.tokens + elapsed * config.rps as f64).min(config.burst_size as f64);
    state.last_refill_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn single_slot_bucket_spaces_acquires_by_min_delay() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rps: 1,
            burst_size: 1,
            min_delay_ms: 1000,
            backoff_multiplier: 2,
            max_backoff_ms: 30_000,
        });

        let start = Instant::now();
        assert!(limiter.acquire(Duration::from_secs(5)).await);
        assert!(limiter.acquire(Duration::from_secs(5)).await);
        assert!(limiter.acquire(Duration::from_secs(5)).await);
        let elapsed = Instant::now().saturating_duration_since(start);
        assert!(elapsed >= Duration::from_millis(2000), "elapsed={elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn high_rps_burst_drains_quickly_then_waits() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rps: 25,
            burst_size: 30,
            min_delay_ms: 1,
            backoff_multiplier: 2,
            max_backoff_ms: 30_000,
        });

        let start = Instant::now();
        for _ in 0..30 {
            assert!(limiter.acquire(Duration::from_secs(5)).await);
        }
        let drained_at = Instant::now().saturating_duration_since(start);
        assert!(drained_at < Duration::from_millis(50), "drained_at={drained_at:?}");

        assert!(limiter.acquire(Duration::from_secs(5)).await);
        let total = Instant::now().saturating_duration_since(start);
        assert!(total >= Duration::from_millis(30), "total={total:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_errors_back_off_exponentially() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rps: 10,
            burst_size: 3,
            min_delay_ms: 100,
            backoff_multiplier: 2,
            max_backoff_ms: 10_000,
        });

        assert!(limiter.acquire(Duration::from_secs(1)).await);
        limiter.report_rate_limit_error().await;
        assert_eq!(limiter.snapshot().await.current_backoff_ms, 200);

        let start = Instant::now();
        assert!(limiter.acquire(Duration::from_secs(1)).await);
        let elapsed = Instant::now().saturating_duration_since(start);
        assert!(elapsed >= Duration::from_millis(200), "elapsed={elapsed:?}");

        limiter.report_rate_limit_error().await;
        assert_eq!(limiter.snapshot().await.current_backoff_ms, 400);
        limiter.report_rate_limit_error().await;
        assert_eq!(limiter.snapshot().await.current_backoff_ms, 800);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_caps_at_max() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rps: 10,
            burst_size: 3,
            min_delay_ms: 1000,
            backoff_multiplier: 3,
            max_backoff_ms: 5_000,
        });
        for _ in 0..5 {
            limiter.report_rate_limit_error().await;
        }
        assert_eq!(limiter.snapshot().await.current_backoff_ms, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn report_success_clears_backoff_and_error_count() {
        let limiter = RateLimiter::from_rps(5);
        limiter.report_rate_limit_error().await;
        limiter.report_success().await;
        let snapshot = limiter.snapshot().await;
        assert_eq!(snapshot.current_backoff_ms, 0);
        assert_eq!(snapshot.consecutive_errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_false_without_panicking() {
        let limiter = RateLimiter::new(RateLimitConfig {
            rps: 1,
            burst_size: 1,
            min_delay_ms: 10_000,
            backoff_multiplier: 2,
            max_backoff_ms: 30_000,
        });
        assert!(limiter.acquire(Duration::from_millis(1)).await);
        assert!(!limiter.acquire(Duration::from_millis(50)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn update_config_clamps_existing_tokens_to_new_burst() {
        let limiter = RateLimiter::from_rps(10);
        limiter
            .update_config(RateLimitConfigOverrides {
                burst_size: Some(1),
                ..Default::default()
            })
            .await;
        assert!(limiter.snapshot().await.tokens <= 1.0);
    }

    #[test]
    fn default_sizing_matches_spec_table() {
        assert_eq!(default_sizing(3), (1, 400));
        assert_eq!(default_sizing(5), (2, 240));
        assert_eq!(default_sizing(25), (38, 44));
    }
}
