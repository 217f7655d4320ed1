//! Circuit breaker (C3): a Closed/Open/HalfOpen state machine per oracle.
//! Mutated only by the fallback layer; a plain `Mutex` with no `.await`
//! held across the critical section is sufficient — no async lock needed.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(60) }
    }
}

struct Inner {
    state: CircuitStateKind,
    failure_count: u32,
    opened_at: Option<Instant>,
    /// A HalfOpen probe is currently in flight; a second caller must not
    /// also be admitted as a probe until this one resolves.
    half_open_probe_in_flight: bool,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitStateKind::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitStateKind {
        self.inner.lock().unwrap().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().unwrap().failure_count
    }

    /// Explicit admin operation: force Closed regardless of current state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitStateKind::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    /// Returns `true` if a call should be admitted right now, performing
    /// the Open -> HalfOpen transition as a side effect when the reset
    /// timeout has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitStateKind::Closed => true,
            CircuitStateKind::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    false
                } else {
                    inner.half_open_probe_in_flight = true;
                    true
                }
            }
            CircuitStateKind::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.reset_timeout {
                    inner.state = CircuitStateKind::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitStateKind::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.half_open_probe_in_flight = false;
        match inner.state {
            CircuitStateKind::HalfOpen => {
                inner.state = CircuitStateKind::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitStateKind::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitStateKind::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitStateKind::Open => {
                // Shouldn't normally happen (admit() would have blocked), but
                // stay defensive: refresh the timer so a stray call doesn't
                // shorten the reset window.
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    /// Run `op` through the breaker: reject immediately with
    /// `CircuitOpen` if not admitted, otherwise run it and record the
    /// outcome against the breaker's state.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, OracleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        if !self.admit() {
            return Err(OracleError::CircuitOpen);
        }
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_failure_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(60) });
        for _ in 0..3 {
            let _: Result<(), OracleError> = breaker.execute(|| async { Err(OracleError::Timeout) }).await;
        }
        assert_eq!(breaker.state(), CircuitStateKind::Open);
    }

    #[tokio::test]
    async fn open_circuit_rejects_immediately() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_secs(60) });
        let _: Result<(), OracleError> = breaker.execute(|| async { Err(OracleError::Timeout) }).await;
        assert_eq!(breaker.state(), CircuitStateKind::Open);

        let result: Result<(), OracleError> = breaker.execute(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(OracleError::CircuitOpen)));
    }

    #[tokio::test]
    async fn half_open_success_closes_and_resets_count() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_millis(1) });
        let _: Result<(), OracleError> = breaker.execute(|| async { Err(OracleError::Timeout) }).await;
        assert_eq!(breaker.state(), CircuitStateKind::Open);

        tokio::time::sleep(Duration::from_millis(5)).await;

        let result: Result<i32, OracleError> = breaker.execute(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), CircuitStateKind::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_millis(1) });
        let _: Result<(), OracleError> = breaker.execute(|| async { Err(OracleError::Timeout) }).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let _: Result<(), OracleError> = breaker.execute(|| async { Err(OracleError::Timeout) }).await;
        assert_eq!(breaker.state(), CircuitStateKind::Open);
    }

    #[tokio::test]
    async fn explicit_reset_forces_closed() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig { failure_threshold: 1, reset_timeout: Duration::from_secs(60) });
        let _: Result<(), OracleError> = breaker.execute(|| async { Err(OracleError::Timeout) }).await;
        assert_eq!(breaker.state(), CircuitStateKind::Open);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitStateKind::Closed);
    }
}
