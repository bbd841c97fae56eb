//! Circuit breaker for the healing endpoint
//!
//! After `threshold` consecutive failures the breaker opens and requests are
//! refused until `cooldown` has passed. The first request after the cooldown
//! is a trial: success closes the breaker, failure re-opens it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests allowed
    Closed,
    /// Requests refused until the cooldown elapses
    Open,
    /// Cooldown elapsed, next request tests recovery
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Consecutive-failure circuit breaker
///
/// # Example
///
/// ```
/// use vigil_agent::CircuitBreaker;
///
/// let cb = CircuitBreaker::new(2, 60);
/// cb.record_failure();
/// cb.record_failure();
/// assert!(!cb.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self::with_cooldown(threshold, Duration::from_secs(cooldown_secs))
    }

    pub fn with_cooldown(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn since_last_failure(&self) -> Option<Duration> {
        let last = self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        last.map(|at| at.elapsed())
    }

    pub fn state(&self) -> CircuitState {
        if self.failures.load(Ordering::Relaxed) < self.threshold {
            return CircuitState::Closed;
        }
        match self.since_last_failure() {
            Some(elapsed) if elapsed < self.cooldown => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self
            .last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }

    pub fn failure_count(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Time left before a trial request is allowed; zero unless open
    pub fn time_until_retry(&self) -> Duration {
        match (self.state(), self.since_last_failure()) {
            (CircuitState::Open, Some(elapsed)) => self.cooldown.saturating_sub(elapsed),
            _ => Duration::ZERO,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}
