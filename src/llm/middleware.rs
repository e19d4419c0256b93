use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use super::adapter::{BackendAdapter, BackendError, CallMetadata, GeneratedItem};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Option<Instant>,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: None,
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_refill {
            let elapsed = now.duration_since(last).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        }
        self.last_refill = Some(now);
    }

    fn try_take(&mut self, amount: f64) -> bool {
        self.refill();
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    trip_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new(trip_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            trip_threshold,
            cooldown,
            opened_at: None,
        }
    }

    fn admit(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.opened_at.map(|t| t.elapsed() >= self.cooldown).unwrap_or(false) {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    fn record_failure(&mut self) {
        match self.state {
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.trip_threshold {
                    self.state = BreakerState::Open;
                    self.opened_at = Some(Instant::now());
                }
            }
        }
    }
}

struct CostTracker {
    daily_budget: Option<f64>,
    spent_today: f64,
    request_count: u64,
    cost_per_request: f64,
}

impl CostTracker {
    fn new(daily_budget: Option<f64>, cost_per_request: f64) -> Self {
        Self {
            daily_budget,
            spent_today: 0.0,
            request_count: 0,
            cost_per_request,
        }
    }

    fn budget_exceeded(&self) -> bool {
        matches!(self.daily_budget, Some(budget) if self.spent_today >= budget)
    }

    fn record(&mut self) {
        self.request_count += 1;
        self.spent_today += self.cost_per_request;
    }
}

/// Wraps any `BackendAdapter` with retry, rate limiting, a circuit breaker
/// and cost tracking (spec §4.4 "Reliability middleware"). The inner
/// adapter only ever sees `generate` calls that have already passed the
/// breaker and the bucket.
pub struct ReliableAdapter {
    inner: Box<dyn BackendAdapter>,
    retry: RetryPolicy,
    requests_bucket: TokenBucket,
    tokens_bucket: TokenBucket,
    breaker: CircuitBreaker,
    cost: CostTracker,
}

impl ReliableAdapter {
    pub fn new(
        inner: Box<dyn BackendAdapter>,
        requests_per_minute: f64,
        tokens_per_minute: f64,
        breaker_trip_threshold: u32,
        breaker_cooldown: Duration,
        daily_budget: Option<f64>,
        cost_per_request: f64,
    ) -> Self {
        Self {
            inner,
            retry: RetryPolicy::default(),
            requests_bucket: TokenBucket::new(requests_per_minute, requests_per_minute / 60.0),
            tokens_bucket: TokenBucket::new(tokens_per_minute, tokens_per_minute / 60.0),
            breaker: CircuitBreaker::new(breaker_trip_threshold, breaker_cooldown),
            cost: CostTracker::new(daily_budget, cost_per_request),
        }
    }

    pub async fn generate(
        &mut self,
        prompt: &str,
        item: &serde_json::Value,
        deadline: Instant,
    ) -> Result<(GeneratedItem, CallMetadata), BackendError> {
        if self.cost.budget_exceeded() {
            return Err(BackendError::Permanent("cost budget exceeded".into()));
        }

        if !self.breaker.admit() {
            return Err(BackendError::Transient("circuit breaker open".into()));
        }

        loop {
            if !self.requests_bucket.try_take(1.0) || !self.tokens_bucket.try_take(1.0) {
                if Instant::now() >= deadline {
                    return Err(BackendError::Transient("rate limit deadline exceeded".into()));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            break;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.generate(prompt, item).await {
                Ok(result) => {
                    self.breaker.record_success();
                    self.cost.record();
                    return Ok(result);
                }
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    self.breaker.record_failure();
                    let backoff = full_jitter_backoff(self.retry.base_delay, self.retry.max_delay, attempt);
                    debug!(attempt, ?backoff, "transient backend failure, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    if !err.is_transient() {
                        warn!(%err, "permanent backend failure");
                    }
                    return Err(err);
                }
            }
        }
    }

    pub async fn close(&mut self) {
        self.inner.close().await;
    }
}

/// Exponential backoff with full jitter: `U(0, min(max, base * 2^attempt))`.
fn full_jitter_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32.wrapping_shl(attempt.min(20)));
    let capped = exp.min(max);
    let jittered_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64);
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_and_half_opens_after_cooldown() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_millis(20));
        assert!(breaker.admit());
        breaker.record_failure();
        assert!(breaker.admit());
        breaker.record_failure();
        assert_eq!(breaker.state, BreakerState::Open);
        assert!(!breaker.admit());
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.admit());
        assert_eq!(breaker.state, BreakerState::HalfOpen);
    }

    #[test]
    fn cost_tracker_trips_on_budget() {
        let mut cost = CostTracker::new(Some(1.0), 0.6);
        assert!(!cost.budget_exceeded());
        cost.record();
        cost.record();
        assert!(cost.budget_exceeded());
    }
}
