//! Circuit breaker guarding one logical dependency.
//!
//! - CLOSED: calls flow through, consecutive failures are counted
//! - OPEN: calls are rejected without invoking the wrapped function
//! - HALF_OPEN: after the reset timeout exactly one probe call is let through
//!
//! A probe that never reports back (its future was dropped, or a caller of
//! [`CircuitBreaker::allow_request`] forgot to record the outcome) frees its
//! slot once another reset timeout has passed.

use crate::config::BreakerDefaults;
use crate::error::{CovpagesError, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - requests flow through.
    Closed,
    /// Failing - requests are rejected immediately.
    Open,
    /// Testing recovery - one probe allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub max_failures: u32,
    /// Time to stay open before allowing a probe.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: BreakerDefaults::MAX_FAILURES,
            reset_timeout: BreakerDefaults::RESET_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_started: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    total_rejected: u64,
}

/// Circuit breaker for protecting against cascading failures.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    /// Create a new circuit breaker with custom configuration.
    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_started: None,
                total_failures: 0,
                total_successes: 0,
                total_rejected: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. An open circuit whose timeout elapsed reports half-open.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Run `operation` through the breaker.
    ///
    /// Rejected calls fail with [`CovpagesError::CircuitBreakerOpen`] and never
    /// invoke `operation`.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(is_probe) = self.admit() else {
            return Err(CovpagesError::CircuitBreakerOpen {
                name: self.name.clone(),
            });
        };

        let mut guard = ProbeGuard {
            breaker: self,
            armed: is_probe,
        };
        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    /// Check if a request should be allowed through, claiming the half-open
    /// probe slot when applicable.
    pub fn allow_request(&self) -> bool {
        self.admit().is_some()
    }

    /// `None` when rejected, otherwise whether the admitted call is the probe.
    fn admit(&self) -> Option<bool> {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);

        let probe_started = inner.probe_started;
        let admitted = match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => None,
            CircuitState::HalfOpen => match probe_started {
                Some(started) if started.elapsed() < self.config.reset_timeout => None,
                stale => {
                    if stale.is_some() {
                        warn!(breaker = %self.name, "Previous probe never reported back, replacing it");
                    }
                    inner.probe_started = Some(Instant::now());
                    Some(true)
                }
            },
        };

        if admitted.is_none() {
            inner.total_rejected += 1;
            debug!(breaker = %self.name, state = %inner.state, "Request rejected");
        }
        admitted
    }

    fn abandon_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_started = None;
            debug!(breaker = %self.name, "Probe abandoned before completing");
        }
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        inner.probe_started = None;

        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.last_failure = None;
            info!(breaker = %self.name, "Circuit breaker recovered to closed");
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.max_failures {
                    inner.state = CircuitState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.probe_started = None;
                warn!(breaker = %self.name, "Probe failed, circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// Get statistics about this circuit breaker.
    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock();
        self.maybe_half_open(&mut inner);
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_rejected: inner.total_rejected,
            since_last_failure: inner.last_failure.map(|t| t.elapsed()),
        }
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_started = None;
        info!(breaker = %self.name, "Circuit breaker reset to closed");
    }

    fn maybe_half_open(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .last_failure
            .map(|t| t.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            inner.state = CircuitState::HalfOpen;
            inner.probe_started = None;
            debug!(breaker = %self.name, "Circuit breaker entering half-open");
        }
    }
}

/// Frees the half-open slot if the probe future is dropped mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_probe();
        }
    }
}

/// Statistics about a circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_rejected: u64,
    pub since_last_failure: Option<Duration>,
}
