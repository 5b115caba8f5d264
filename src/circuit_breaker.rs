//! Circuit breaker for warehouse authority calls.
//!
//! Stops the service from piling requests onto a warehouse that is already
//! failing. Built on the `recloser` crate.
//!
//! # States
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Authority unhealthy, calls fail fast without a network round-trip
//! - **HalfOpen**: Probing whether the authority recovered
//!
//! # Usage
//!
//! ```rust,no_run
//! # use stock_sync::circuit_breaker::{AuthorityCircuit, CircuitError};
//! # async fn example() -> Result<(), CircuitError<String>> {
//! let circuit = AuthorityCircuit::new();
//!
//! match circuit.reads.call(|| async { Ok::<u64, String>(12) }).await {
//!     Ok(quantity) => { /* fresh availability */ }
//!     Err(CircuitError::Rejected) => { /* circuit open */ }
//!     Err(CircuitError::Inner(e)) => { /* warehouse error */ }
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::StockError;
use crate::metrics;
use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Circuit breaker state for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            1 => Self::HalfOpen,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Error type for circuit-protected operations.
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open).
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed.
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> CircuitError<E> {
    pub fn is_rejected(&self) -> bool {
        matches!(self, CircuitError::Rejected)
    }

    pub fn inner(&self) -> Option<&E> {
        match self {
            CircuitError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

impl CircuitError<StockError> {
    /// Collapse into a [`StockError`]; a rejection becomes `UpstreamUnavailable`.
    pub fn into_stock_error(self, operation: &str) -> StockError {
        match self {
            CircuitError::Rejected => {
                StockError::upstream(operation, "circuit breaker open, request rejected")
            }
            CircuitError::Inner(e) => e,
        }
    }
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Size of the failure window that must fill before the circuit can trip.
    pub failure_threshold: u32,
    /// Number of trial calls allowed while half-open.
    pub success_threshold: u32,
    /// How long to stay open before probing (half-open).
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Trips faster and recovers cautiously. Used for stock record creation.
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }

    /// Fast recovery for testing.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            failure_threshold: 2,
            success_threshold: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// A named circuit breaker with call accounting.
///
/// `recloser` does not expose its state, so the breaker tracks the state
/// implied by the outcomes it observes: a rejection means open, and
/// `success_threshold` consecutive successes after that mean closed again.
pub struct CircuitBreaker {
    name: String,
    inner: AsyncRecloser,
    success_threshold: u32,
    observed: AtomicU8,
    recovery_successes: AtomicU32,

    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        // Trips once at least half of the last `failure_threshold` calls failed.
        let recloser = Recloser::custom()
            .error_rate(0.5)
            .closed_len(config.failure_threshold.max(1) as usize)
            .half_open_len(config.success_threshold.max(1) as usize)
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            inner: recloser.into(),
            success_threshold: config.success_threshold.max(1),
            observed: AtomicU8::new(CircuitState::Closed as u8),
            recovery_successes: AtomicU32::new(0),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute an async operation through the circuit breaker.
    ///
    /// Takes a closure that returns a Future, so nothing runs when rejected.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        match self.inner.call(f()).await {
            Ok(result) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.observe_success();
                metrics::record_circuit_call(&self.name, "success");
                Ok(result)
            }
            Err(RecloserError::Rejected) => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                self.set_observed(CircuitState::Open);
                metrics::record_circuit_call(&self.name, "rejected");
                warn!(circuit = %self.name, "Circuit breaker rejected call (open)");
                Err(CircuitError::Rejected)
            }
            Err(RecloserError::Inner(e)) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.observe_failure();
                metrics::record_circuit_call(&self.name, "failure");
                debug!(circuit = %self.name, "Circuit call failed");
                Err(CircuitError::Inner(e))
            }
        }
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Check if the circuit was open as of the last call.
    #[must_use]
    pub fn is_likely_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// State as of the last observed call, for health reporting.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.observed.load(Ordering::Acquire))
    }

    fn set_observed(&self, state: CircuitState) {
        self.recovery_successes.store(0, Ordering::Relaxed);
        self.observed.store(state as u8, Ordering::Release);
    }

    fn observe_success(&self) {
        if self.state() == CircuitState::Closed {
            return;
        }
        // A call got through after a rejection: the breaker is probing.
        let streak = self.recovery_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= self.success_threshold {
            debug!(circuit = %self.name, "Circuit breaker closed after recovery");
            self.set_observed(CircuitState::Closed);
        } else {
            self.observed
                .store(CircuitState::HalfOpen as u8, Ordering::Release);
        }
    }

    fn observe_failure(&self) {
        // A failed probe reopens the breaker; a failure while closed only
        // shows up as a rejection on a later call.
        if self.state() != CircuitState::Closed {
            self.set_observed(CircuitState::Open);
        }
    }
}

/// Circuits guarding the two warehouse operations.
pub struct AuthorityCircuit {
    /// Availability reads (read-through misses)
    pub reads: CircuitBreaker,
    /// Stock record creation (provisioning)
    pub writes: CircuitBreaker,
}

impl Default for AuthorityCircuit {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityCircuit {
    pub fn new() -> Self {
        Self::with_configs(CircuitConfig::default(), CircuitConfig::aggressive())
    }

    pub fn with_configs(reads_config: CircuitConfig, writes_config: CircuitConfig) -> Self {
        Self {
            reads: CircuitBreaker::new("authority_reads", reads_config),
            writes: CircuitBreaker::new("authority_writes", writes_config),
        }
    }

    /// Check if any circuit is open.
    pub fn any_open(&self) -> bool {
        self.reads.is_likely_open() || self.writes.is_likely_open()
    }

    /// Worst state across both circuits.
    pub fn state(&self) -> CircuitState {
        let (reads, writes) = (self.reads.state(), self.writes.state());
        if reads as u8 >= writes as u8 {
            reads
        } else {
            writes
        }
    }
}
