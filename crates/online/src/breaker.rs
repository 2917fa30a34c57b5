//! Circuit breaker guarding calls into an unreliable dependency.
//!
//! - Closed: calls pass through; consecutive failures are counted.
//! - Open: after `failure_threshold` consecutive failures, calls fail fast
//!   without invoking the operation until `reset_timeout` has elapsed.
//! - Half-open: after the cool-down exactly one probe call is admitted.
//!   Its success closes the breaker, its failure reopens it and restarts
//!   the cool-down clock. Other callers keep failing fast meanwhile.
//!
//! All counters and transitions sit behind one lock, so concurrent failure
//! bursts neither under-count nor reopen twice. The clock is tokio's
//! monotonic `Instant`, which lets tests drive the cool-down with a paused
//! runtime. A call whose future is dropped mid-flight counts as a failure.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use strata_telemetry::metrics::CIRCUIT_BREAKER_STATE;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub reset_timeout: Duration,
    /// Optional deadline applied to each guarded call. Expiry counts as failure.
    pub call_timeout: Option<Duration>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            call_timeout: None,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Whether the operation was rejected without being invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// A named, shareable circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, BreakerConfig::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, without side effects.
    ///
    /// An open breaker whose cool-down has elapsed reports `HalfOpen`: the
    /// next call will be admitted as a probe.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Open if self.cooled_down(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Run `operation` through the breaker.
    ///
    /// Returns `BreakerError::Open` without invoking `operation` while the
    /// breaker is open (or while another caller holds the half-open probe).
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.acquire().ok_or_else(|| BreakerError::Open {
            name: self.name.clone(),
        })?;

        let result = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(inner) => inner.map_err(BreakerError::Inner),
                Err(_) => Err(BreakerError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => operation().await.map_err(BreakerError::Inner),
        };

        permit.settle(result.is_ok());
        result
    }

    fn cooled_down(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(Permit::new(self, false)),
            CircuitState::Open if self.cooled_down(&inner) => {
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.probe_in_flight = true;
                Some(Permit::new(self, true))
            }
            CircuitState::HalfOpen if !inner.probe_in_flight => {
                inner.probe_in_flight = true;
                Some(Permit::new(self, true))
            }
            _ => None,
        }
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        if probe {
            inner.probe_in_flight = false;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            self.transition(&mut inner, CircuitState::Closed);
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        if probe {
            inner.probe_in_flight = false;
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, CircuitState::Open);
        } else if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.reset_timeout.as_secs(),
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => debug!(breaker = %self.name, "Circuit breaker half-open, admitting probe"),
            CircuitState::Closed => info!(breaker = %self.name, from = %from, "Circuit breaker closed"),
        }
        metrics::gauge!(CIRCUIT_BREAKER_STATE, "breaker" => self.name.clone()).set(to.gauge_value());
    }
}

/// Admission ticket for one guarded call. Dropping it unsettled records a failure.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    fn settle(&mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.record_success(self.probe);
        } else {
            self.breaker.record_failure(self.probe);
        }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure(self.probe);
        }
    }
}
