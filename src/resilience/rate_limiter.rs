use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterSnapshot {
    /// Bucket size; `None` when unlimited.
    pub capacity: Option<u32>,
    pub available: f64,
    /// Left on a provider-imposed block, if any.
    pub blocked_ms: Option<u64>,
    /// Expected wait for the next token, block included.
    pub estimated_wait_ms: Option<u64>,
}

/// `capacity` tokens, refilled evenly over `window`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub window: Duration,
}

impl RateLimiterConfig {
    /// `requests` per `window`; the whole window's budget may be spent at once.
    /// Zero requests or a zero window means unlimited.
    pub fn per_window(requests: u32, window: Duration) -> Self {
        if requests == 0 || window.is_zero() {
            return Self::unlimited();
        }
        Self {
            capacity: requests,
            window,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            capacity: 0,
            window: Duration::ZERO,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity == 0 || self.window.is_zero()
    }

    fn tokens_per_sec(&self) -> f64 {
        self.capacity as f64 / self.window.as_secs_f64()
    }
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    refilled_at: Instant,
    blocked_until: Option<Instant>,
}

impl Bucket {
    fn refill(&mut self, cfg: &RateLimiterConfig, now: Instant) {
        if cfg.is_unlimited() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.available = (self.available + elapsed * cfg.tokens_per_sec()).min(cfg.capacity as f64);
        self.refilled_at = now;
    }

    fn block_remaining(&mut self, now: Instant) -> Option<Duration> {
        let until = self.blocked_until?;
        if until > now {
            Some(until - now)
        } else {
            self.blocked_until = None;
            None
        }
    }

    fn has_token(&self, cfg: &RateLimiterConfig) -> bool {
        cfg.is_unlimited() || self.available >= 1.0
    }
}

/// Token bucket for remote-provider quota and API admission.
///
/// A provider that answers 429 with `Retry-After` can shut the bucket for that
/// long via [`RateLimiter::block_for`]; the block applies even when unlimited.
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let bucket = Bucket {
            available: cfg.capacity as f64,
            refilled_at: Instant::now(),
            blocked_until: None,
        };
        Self {
            cfg,
            bucket: Mutex::new(bucket),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.cfg
    }

    /// Take a token if one is available. Never waits.
    pub async fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut bucket = self.bucket.lock().await;
        if bucket.block_remaining(now).is_some() {
            return false;
        }
        bucket.refill(&self.cfg, now);
        if !bucket.has_token(&self.cfg) {
            return false;
        }
        if !self.cfg.is_unlimited() {
            bucket.available -= 1.0;
        }
        true
    }

    /// Same answer as [`RateLimiter::try_acquire`] would give, without taking the token.
    pub async fn has_capacity(&self) -> bool {
        let now = Instant::now();
        let mut bucket = self.bucket.lock().await;
        if bucket.block_remaining(now).is_some() {
            return false;
        }
        bucket.refill(&self.cfg, now);
        bucket.has_token(&self.cfg)
    }

    /// Refuse every token for `after`. Overlapping blocks keep the later deadline.
    pub async fn block_for(&self, after: Duration) {
        let until = Instant::now() + after;
        let mut bucket = self.bucket.lock().await;
        bucket.blocked_until = Some(bucket.blocked_until.map_or(until, |prev| prev.max(until)));
        tracing::debug!(block_ms = after.as_millis() as u64, "rate limiter blocked");
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let now = Instant::now();
        let mut bucket = self.bucket.lock().await;
        let blocked = bucket.block_remaining(now);
        bucket.refill(&self.cfg, now);

        let refill_wait = if bucket.has_token(&self.cfg) {
            None
        } else {
            let missing = 1.0 - bucket.available;
            Some(Duration::from_secs_f64(missing / self.cfg.tokens_per_sec()))
        };
        let wait = match (blocked, refill_wait) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        RateLimiterSnapshot {
            capacity: (!self.cfg.is_unlimited()).then_some(self.cfg.capacity),
            available: bucket.available,
            blocked_ms: blocked.map(|d| d.as_millis() as u64),
            estimated_wait_ms: wait.map(|d| d.as_millis().max(1) as u64),
        }
    }

    /// How long until a token is expected, if none is available now.
    pub async fn retry_after(&self) -> Option<Duration> {
        self.snapshot()
            .await
            .estimated_wait_ms
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_per_minute_config() {
        let cfg = RateLimiterConfig::per_window(60, Duration::from_secs(60));
        assert_eq!(cfg.capacity, 60);
        assert!((cfg.tokens_per_sec() - 1.0).abs() < f64::EPSILON);
        assert!(RateLimiterConfig::per_window(0, Duration::from_secs(60)).is_unlimited());
        assert!(RateLimiterConfig::per_window(10, Duration::ZERO).is_unlimited());
    }

    #[tokio::test]
    async fn admission_budget_is_spent_then_refused() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(3, Duration::from_secs(3600)));
        for _ in 0..3 {
            assert!(limiter.has_capacity().await);
            assert!(limiter.try_acquire().await);
        }
        assert!(!limiter.has_capacity().await);
        assert!(!limiter.try_acquire().await);

        let wait = limiter.retry_after().await.unwrap();
        assert!(wait > Duration::from_secs(1_000));
        assert_eq!(limiter.snapshot().await.capacity, Some(3));
    }

    #[tokio::test]
    async fn peeking_does_not_consume() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(1, Duration::from_secs(600)));
        for _ in 0..5 {
            assert!(limiter.has_capacity().await);
        }
        assert!(limiter.try_acquire().await);
        assert!(!limiter.has_capacity().await);
    }

    #[tokio::test]
    async fn unlimited_never_refuses_on_its_own() {
        let limiter = RateLimiter::new(RateLimiterConfig::unlimited());
        for _ in 0..500 {
            assert!(limiter.try_acquire().await);
        }
        let snap = limiter.snapshot().await;
        assert_eq!(snap.capacity, None);
        assert!(snap.estimated_wait_ms.is_none());
    }

    #[tokio::test]
    async fn provider_retry_after_blocks_the_bucket() {
        let limiter = RateLimiter::new(RateLimiterConfig::unlimited());
        limiter.block_for(Duration::from_millis(50)).await;
        limiter.block_for(Duration::from_millis(10)).await;
        assert!(!limiter.try_acquire().await);
        assert!(limiter.snapshot().await.blocked_ms.unwrap() > 10);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.try_acquire().await);
        assert!(limiter.snapshot().await.blocked_ms.is_none());
    }

    #[tokio::test]
    async fn tokens_come_back_over_the_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_window(2, Duration::from_millis(40)));
        assert!(limiter.try_acquire().await);
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.try_acquire().await);
    }
}
