use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

/// Classic token bucket: tokens refill continuously at `rate_per_sec` up to
/// `capacity`, and each request consumes one.
#[derive(Debug)]
pub struct TokenBucket {
    /// Tokens per second. 0 = unlimited.
    rate_per_sec: f64,
    capacity: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket starts full so the first `burst` requests go out immediately.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            rate_per_sec: rate_per_sec.max(0.0),
            capacity,
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate_per_sec == 0.0
    }

    /// Takes a token, or reports how long until one is available.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(missing / self.rate_per_sec))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

/// Async wrapper around a [`TokenBucket`] shared by every request of one
/// entity.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::new(rate_per_sec, burst)),
        }
    }

    pub fn unlimited() -> Self {
        Self {
            bucket: Mutex::new(TokenBucket::unlimited()),
        }
    }

    /// Waits until a token is available. Returns the time spent waiting, or
    /// `None` if the token was cancelled first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<Duration> {
        let started = Instant::now();
        loop {
            let wait = match self.bucket.lock().await.try_acquire() {
                Ok(()) => return Some(started.elapsed()),
                Err(wait) => wait,
            };
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unlimited_always_acquires() {
        let mut bucket = TokenBucket::unlimited();
        for _ in 0..1000 {
            assert!(bucket.try_acquire().is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_deny() {
        let mut bucket = TokenBucket::new(2.0, 3);
        for _ in 0..3 {
            assert!(bucket.try_acquire().is_ok());
        }
        let wait = bucket.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        let mut bucket = TokenBucket::new(10.0, 1);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(bucket.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_spaces_requests() {
        let limiter = RateLimiter::new(4.0, 1);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire(&cancel).await.unwrap();
        }
        // first request is free, the next four wait 250ms each
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_honours_cancellation() {
        let limiter = RateLimiter::new(0.001, 1);
        let cancel = CancellationToken::new();
        limiter.acquire(&cancel).await.unwrap();

        cancel.cancel();
        assert!(limiter.acquire(&cancel).await.is_none());
    }
}
