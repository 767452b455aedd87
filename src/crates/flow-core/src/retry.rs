//! Retry Policy half of C15: exponential backoff with jitter over a typed
//! set of retriable errors, and the circuit breaker it cooperates with.
//!
//! `base * 2^attempt` backoff matches §4.11 and the P4 testable property.

use rand::Rng;
use std::time::Duration;

/// Error taxonomy a retry wrapper classifies against (§4.4, §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetriableKind {
    Timeout,
    ConnectionError,
    UrlError,
    RateLimited,
    ServerError,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(128),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self { max_attempts, ..Default::default() }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = Duration::from_secs_f64(seconds);
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = Duration::from_secs_f64(seconds);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `base * 2^attempt` nominal delay, capped at `max_interval`, with an
    /// optional +/-50% jitter band to avoid thundering herds.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let nominal = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = nominal.min(self.max_interval.as_secs_f64());
        let final_secs = if self.jitter {
            let mut rng = rand::thread_rng();
            capped * rng.gen_range(0.5..1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(final_secs.max(0.0))
    }

    /// Nominal (non-jittered) delay, used by tests asserting the P4 lower
    /// bound on total sleep time.
    pub fn nominal_delay(&self, attempt: usize) -> Duration {
        let nominal = self.initial_interval.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(nominal.min(self.max_interval.as_secs_f64()))
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt + 1 < self.max_attempts
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub attempts: usize,
    pub last_error: Option<String>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&mut self, error: Option<String>) {
        self.attempts += 1;
        self.last_error = error;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_error = None;
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping
/// `policy.calculate_delay` between attempts whenever `classify` says the
/// error is retriable. Returns the last error once attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    mut op: F,
    classify: impl Fn(&E) -> bool,
) -> Result<(T, RetryState), E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut state = RetryState::new();
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok((v, state)),
            Err(e) => {
                state.record_attempt(Some(e.to_string()));
                if !classify(&e) || !policy.should_retry(attempt) {
                    return Err(e);
                }
                tokio::time::sleep(policy.calculate_delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_before_cap() {
        let policy = RetryPolicy::default().with_jitter(false);
        assert_eq!(policy.nominal_delay(0), Duration::from_millis(500));
        assert_eq!(policy.nominal_delay(1), Duration::from_secs(1));
        assert_eq!(policy.nominal_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[tokio::test]
    async fn with_retry_stops_on_non_retriable_error() {
        let policy = RetryPolicy::new(5).with_initial_interval(0.0);
        let mut calls = 0;
        let result: Result<((), RetryState), &str> = with_retry(
            &policy,
            |_attempt| {
                calls += 1;
                async { Err("fatal") }
            },
            |_e| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
