use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    /// Retry, but wait at least this long (e.g. a `Retry-After` hint).
    RetryAfter(Duration),
    Stop,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Wait(Duration),
    GiveUp,
    Fatal,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal(E),
    /// The error was retryable, but attempts or the total wait budget ran out.
    AttemptsExceeded { error: E, attempts: u32 },
    /// The surrounding job was cancelled while waiting or in flight.
    Cancelled,
}

/// Bookkeeping carried between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far, including the one that just failed.
    pub attempts: u32,
    pub last_delay: Duration,
    pub total_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_total_wait: Duration,
    /// Extra random delay, as a fraction of the computed backoff.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_total_wait: Duration::from_secs(120),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
            ..Self::default()
        }
    }

    pub fn with_max_total_wait(mut self, max_total_wait: Duration) -> Self {
        self.max_total_wait = max_total_wait;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Decides what follows a failed attempt.
    ///
    /// Waits never shrink from one attempt to the next and never exceed the
    /// cap (`max_delay`, or a larger server hint). Running out of attempts
    /// or of total wait budget both give up.
    pub fn decide(&self, disposition: RetryDisposition, state: &RetryState) -> RetryDecision {
        let hint = match disposition {
            RetryDisposition::Stop => return RetryDecision::Fatal,
            RetryDisposition::Retry => None,
            RetryDisposition::RetryAfter(hint) => Some(hint),
        };

        if state.attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let cap = hint.map_or(self.max_delay, |h| h.max(self.max_delay));
        let delay = hint
            .map_or(self.backoff_delay(state.attempts), |h| {
                self.backoff_delay(state.attempts).max(h)
            })
            .min(cap)
            .max(state.last_delay);

        if state.total_wait.saturating_add(delay) > self.max_total_wait {
            return RetryDecision::GiveUp;
        }

        RetryDecision::Wait(delay)
    }

    /// Executes the operation with the configured retry policy.
    ///
    /// `op` receives the 1-based attempt number; `on_retry` is told about
    /// every wait before it happens.
    pub async fn run<F, Fut, T, E, Classifier, OnRetry>(
        &self,
        mut op: F,
        classify: Classifier,
        mut on_retry: OnRetry,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
        OnRetry: FnMut(u32, Duration, &E),
    {
        let mut state = RetryState::default();

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let attempt = state.attempts + 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = op(attempt) => result,
            };
            state.attempts = attempt;

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match self.decide(classify(&err), &state) {
                RetryDecision::Fatal => return Err(RetryError::Fatal(err)),
                RetryDecision::GiveUp => {
                    return Err(RetryError::AttemptsExceeded {
                        error: err,
                        attempts: state.attempts,
                    });
                }
                RetryDecision::Wait(delay) => {
                    on_retry(attempt, delay, &err);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    state.last_delay = delay;
                    state.total_wait = state.total_wait.saturating_add(delay);
                }
            }
        }
    }

    fn backoff_delay(&self, attempts: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let exponent = attempts.saturating_sub(1).min(16);
        let factor = 1u128 << exponent;
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor) as f64;
        let jittered = if self.jitter > 0.0 {
            delay_ms * (1.0 + rand::thread_rng().gen_range(0.0..=self.jitter))
        } else {
            delay_ms
        };
        let capped = jittered.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}
