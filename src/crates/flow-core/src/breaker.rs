//! Circuit Breaker half of C15: per-key `closed -> open -> half_open` state
//! machine, process-wide (§5: "Circuit breaker state is process-wide, keyed
//! by provider/tool key").

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerEntry {
    pub state: BreakerState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
    pub cooldown: Duration,
    /// Set when `half_open` has already let one probe through, so
    /// concurrent callers don't all race the same probe (§4.11: "`half_open`
    /// allows one probe"). Cleared the moment that probe's outcome lands.
    probe_in_flight: bool,
}

impl CircuitBreakerEntry {
    fn new(cooldown: Duration) -> Self {
        Self { state: BreakerState::Closed, failure_count: 0, opened_at: None, cooldown, probe_in_flight: false }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, cooldown: Duration::from_secs(30) }
    }
}

/// Keyed by `model:<provider>:<model>` or `tool:<name>` (§3).
#[derive(Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    entries: Arc<Mutex<HashMap<String, CircuitBreakerEntry>>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Consults current state, transitioning `open -> half_open` once the
    /// cooldown has elapsed. Returns whether the call may proceed.
    pub fn should_allow_call(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| CircuitBreakerEntry::new(self.config.cooldown));
        match entry.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    true
                }
            }
            BreakerState::Open => {
                if let Some(opened_at) = entry.opened_at {
                    if opened_at.elapsed() >= entry.cooldown {
                        entry.state = BreakerState::HalfOpen;
                        entry.probe_in_flight = true;
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| CircuitBreakerEntry::new(self.config.cooldown));
        entry.state = BreakerState::Closed;
        entry.failure_count = 0;
        entry.opened_at = None;
        entry.probe_in_flight = false;
    }

    /// On failure: a `half_open` probe re-opens with an extended cooldown;
    /// a `closed` breaker opens after `failure_threshold` consecutive
    /// failures (P5).
    pub fn record_failure(&self, key: &str) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| CircuitBreakerEntry::new(self.config.cooldown));
        match entry.state {
            BreakerState::HalfOpen => {
                entry.cooldown *= 2;
                entry.state = BreakerState::Open;
                entry.opened_at = Some(Instant::now());
                entry.probe_in_flight = false;
            }
            BreakerState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= self.config.failure_threshold {
                    entry.state = BreakerState::Open;
                    entry.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state_of(&self, key: &str) -> BreakerState {
        self.entries.lock().get(key).map(|e| e.state).unwrap_or(BreakerState::Closed)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

pub fn provider_key(provider: &str, model: &str) -> String {
    format!("model:{provider}:{model}")
}

pub fn tool_key(tool: &str) -> String {
    format!("tool:{tool}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(BreakerConfig { failure_threshold: 3, cooldown: Duration::from_millis(10) });
        for _ in 0..3 {
            breaker.record_failure("k");
        }
        assert_eq!(breaker.state_of("k"), BreakerState::Open);
        assert!(!breaker.should_allow_call("k"));
    }

    #[test]
    fn half_opens_after_cooldown_and_allows_one_probe() {
        let breaker = CircuitBreaker::new(BreakerConfig { failure_threshold: 1, cooldown: Duration::from_millis(1) });
        breaker.record_failure("k");
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.should_allow_call("k"));
        assert_eq!(breaker.state_of("k"), BreakerState::HalfOpen);
    }

    #[test]
    fn success_resets_to_closed() {
        let breaker = CircuitBreaker::new(BreakerConfig { failure_threshold: 1, cooldown: Duration::from_millis(1) });
        breaker.record_failure("k");
        std::thread::sleep(Duration::from_millis(5));
        breaker.should_allow_call("k");
        breaker.record_success("k");
        assert_eq!(breaker.state_of("k"), BreakerState::Closed);
    }

    #[test]
    fn half_open_allows_only_one_concurrent_probe() {
        let breaker = CircuitBreaker::new(BreakerConfig { failure_threshold: 1, cooldown: Duration::from_millis(1) });
        breaker.record_failure("k");
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.should_allow_call("k"));
        assert!(!breaker.should_allow_call("k"), "a second caller must not race the same probe");
        breaker.record_success("k");
        assert!(breaker.should_allow_call("k"), "a fresh probe is allowed once the in-flight one resolved");
    }
}
