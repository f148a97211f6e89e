use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket tracked by the instant at which it is full again.
///
/// Every reservation pushes `full_at` one emission interval further, so a
/// burst of waiters is spread out at exactly `1 / rate` apart instead of
/// racing for the next refill.
#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: u32,
    emission_interval: Duration,
    full_at: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: u32, now: Instant) -> Self {
        Self {
            capacity: capacity.max(1),
            emission_interval: Duration::from_nanos(1_000_000_000 / u64::from(refill_rate.max(1))),
            full_at: now,
        }
    }

    /// Span of time covered by all tokens except the one being taken.
    fn burst_window(&self) -> Duration {
        self.emission_interval * (self.capacity - 1)
    }

    /// Instant at which the next token can be taken.
    fn next_token_at(&self, now: Instant) -> Instant {
        let base = self.full_at.max(now);
        base.checked_sub(self.burst_window())
            .map_or(now, |at| at.max(now))
    }

    /// Reserve one token and return the instant it becomes usable.
    fn reserve(&mut self, now: Instant) -> Instant {
        let grant_at = self.next_token_at(now);
        self.full_at = self.full_at.max(now) + self.emission_interval;
        grant_at
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        if self.next_token_at(now) > now {
            return false;
        }
        self.reserve(now);
        true
    }

    fn available_tokens(&self, now: Instant) -> f64 {
        let outstanding = self.full_at.saturating_duration_since(now).as_secs_f64()
            / self.emission_interval.as_secs_f64();
        (f64::from(self.capacity) - outstanding).max(0.0)
    }
}

/// Process-wide limiter for upstream requests.
///
/// Clones share one bucket. Waiters are served in arrival order: the lock is
/// only held while reserving a slot, never while sleeping. A caller dropped
/// while waiting forfeits its slot.
#[derive(Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<TokenBucket>>,
    rate_per_second: u32,
}

impl RateLimiter {
    /// Limiter granting `rate_per_second` permits per second with a burst
    /// allowance of `burst` permits, capped at the rate.
    ///
    /// Only a burst of 1 keeps every sliding one-second window at or below
    /// `rate_per_second` grants.
    pub fn new(rate_per_second: u32, burst: u32) -> Self {
        let rate_per_second = rate_per_second.max(1);
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                burst.clamp(1, rate_per_second),
                rate_per_second,
                Instant::now(),
            ))),
            rate_per_second,
        }
    }

    pub fn rate_per_second(&self) -> u32 {
        self.rate_per_second
    }

    /// Acquire a permit, waiting until one is available
    pub async fn acquire(&self) {
        let grant_at = {
            let mut bucket = self.bucket.lock().await;
            bucket.reserve(Instant::now())
        };

        let now = Instant::now();
        if grant_at > now {
            tracing::trace!(
                wait_ms = (grant_at - now).as_millis() as u64,
                "Rate limit reached, waiting for token"
            );
            tokio::time::sleep_until(grant_at).await;
        }
    }

    /// Try to acquire a permit without blocking
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        bucket.try_acquire(Instant::now())
    }

    /// Get the current number of available permits
    pub async fn available_tokens(&self) -> f64 {
        let bucket = self.bucket.lock().await;
        bucket.available_tokens(Instant::now())
    }
}
