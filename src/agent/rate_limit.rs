//! Token bucket rate limiting for streamed delivery.
//!
//! One bucket is shared by every sender worker, so the configured rate caps
//! the agent as a whole rather than each worker.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentError;

/// Longest single wait reported for the next token. Slower rates re-check
/// after this long.
pub const MAX_TOKEN_WAIT: Duration = Duration::from_secs(60);

/// Rate limit settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sustained rate. Zero or less disables limiting.
    pub requests_per_second: f64,
    /// Tokens available at once.
    pub burst_size: u32,
}

impl RateLimitConfig {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size: burst_size.max(1),
        }
    }

    /// `rps` requests per second with a burst of one.
    pub fn per_second(rps: f64) -> Self {
        Self::new(rps, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.requests_per_second.is_nan() || self.requests_per_second <= 0.0
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(burst_size: u32) -> Self {
        Self {
            tokens: f64::from(burst_size),
            last_update: Instant::now(),
        }
    }

    /// Refill, then take a token or report how long until one is available.
    fn try_consume(&mut self, config: &RateLimitConfig, now: Instant) -> Result<(), Duration> {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * config.requests_per_second).min(f64::from(config.burst_size));
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let needed = 1.0 - self.tokens;
            let wait = Duration::try_from_secs_f64(needed / config.requests_per_second)
                .unwrap_or(MAX_TOKEN_WAIT);
            Err(wait.min(MAX_TOKEN_WAIT))
        }
    }
}

/// Shared token bucket.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = TokenBucket::new(config.burst_size);
        Self {
            config,
            bucket: Mutex::new(bucket),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take a token without waiting.
    ///
    /// Returns the time until the next token when none is available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if self.config.is_unlimited() {
            return Ok(());
        }
        self.bucket.lock().try_consume(&self.config, Instant::now())
    }

    /// Wait for a token, or until `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AgentError> {
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_sustained_rate() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(10.0));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire(&cancel).await.unwrap();
        }

        // One token up front, four more at 100ms each.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(350), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_wait() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2.0, 2));
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());

        let wait = limiter.try_acquire().unwrap_err();
        assert!(wait <= Duration::from_millis(500));
        assert!(wait > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancelled_while_waiting() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(0.1));
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanishing_rate_waits_without_panicking() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(1e-20));
        assert!(limiter.try_acquire().is_ok());
        assert_eq!(limiter.try_acquire().unwrap_err(), MAX_TOKEN_WAIT);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(MAX_TOKEN_WAIT * 3).await;
            canceller.cancel();
        });
        assert!(limiter.acquire(&cancel).await.unwrap_err().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_rate_never_waits() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(f64::INFINITY));
        for _ in 0..100 {
            assert!(limiter.try_acquire().is_ok());
        }
    }

    #[tokio::test]
    async fn test_zero_rate_is_unlimited() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(0.0));
        assert!(limiter.config().is_unlimited());
        for _ in 0..1000 {
            assert!(limiter.try_acquire().is_ok());
        }
    }
}
