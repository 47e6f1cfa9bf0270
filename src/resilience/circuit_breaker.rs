// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for remote content dispatch.
//!
//! Counts consecutive remote-sync failures and, once the threshold is hit,
//! suppresses further remote attempts until a cooldown passes. There is no
//! half-open trial call: the breaker closes lazily, the first time anyone reads it
//! after the cooldown, and the failure count starts again from zero.
//!
//! States:
//! - Closed: failures < max, remote attempts allowed
//! - Open: failures >= max and now < open_until, remote attempts suppressed
//!
//! Failures that arrive while already open refresh `last_failure` but never
//! move `open_until`, so a failure storm cannot lock the breaker open forever.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncEngineConfig;

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of consecutive failures to trip the circuit
    pub max_failures: u32,
    /// How long the circuit stays open
    pub reset_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&SyncEngineConfig> for CircuitConfig {
    fn from(config: &SyncEngineConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            reset_timeout: config.reset_timeout(),
        }
    }
}

impl CircuitConfig {
    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_failures: 2,
            reset_timeout: Duration::from_millis(50),
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub failures: u32,
    pub last_failure: Option<Instant>,
    pub is_open: bool,
    pub open_until: Option<Instant>,
    pub max_failures: u32,
    pub reset_timeout: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    failures: u32,
    last_failure: Option<Instant>,
    is_open: bool,
    open_until: Option<Instant>,
}

/// A named circuit breaker with metrics tracking
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,

    // Metrics
    successes: AtomicU64,
    failures_total: AtomicU64,
    rejections: AtomicU64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and config
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::default()),
            successes: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Close the circuit if its cooldown has passed. Caller holds the lock.
    fn expire_locked(&self, inner: &mut Inner, now: Instant) {
        if !inner.is_open {
            return;
        }
        let expired = inner.open_until.map_or(true, |until| now >= until);
        if expired {
            inner.is_open = false;
            inner.failures = 0;
            inner.open_until = None;
            info!(circuit = %self.name, "Circuit breaker cooldown elapsed, closing");
            crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
        }
    }

    /// Whether remote attempts are allowed right now.
    ///
    /// This is the read that auto-resets an expired open circuit.
    pub fn is_closed(&self) -> bool {
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner, Instant::now());
        !inner.is_open
    }

    /// Get current circuit state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        if self.is_closed() {
            CircuitState::Closed
        } else {
            CircuitState::Open
        }
    }

    /// Snapshot the breaker (applies the lazy reset first).
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner, Instant::now());
        CircuitBreakerState {
            failures: inner.failures,
            last_failure: inner.last_failure,
            is_open: inner.is_open,
            open_until: inner.open_until,
            max_failures: self.config.max_failures,
            reset_timeout: self.config.reset_timeout,
        }
    }

    /// Record a remote-sync failure. Returns the state after recording it.
    pub fn handle_sync_error(&self, error: &dyn std::fmt::Display) -> CircuitState {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner, now);

        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(now);
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_breaker_call(&self.name, "failure");

        if inner.is_open {
            debug!(circuit = %self.name, failures = inner.failures, error = %error, "Failure while open, cooldown unchanged");
            return CircuitState::Open;
        }

        if inner.failures >= self.config.max_failures {
            inner.is_open = true;
            inner.open_until = Some(now + self.config.reset_timeout);
            self.trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                circuit = %self.name,
                failures = inner.failures,
                cooldown_ms = crate::metrics::duration_ms(self.config.reset_timeout),
                error = %error,
                "Circuit breaker opened"
            );
            crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
            CircuitState::Open
        } else {
            debug!(circuit = %self.name, failures = inner.failures, error = %error, "Remote sync failure recorded");
            CircuitState::Closed
        }
    }

    /// Record a remote-sync success. Clears the consecutive failure count while closed.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_breaker_call(&self.name, "success");
        let mut inner = self.inner.lock();
        self.expire_locked(&mut inner, Instant::now());
        if !inner.is_open {
            inner.failures = 0;
        }
    }

    /// Force the circuit open for one cooldown.
    pub fn trip(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.max(self.config.max_failures);
        inner.is_open = true;
        inner.open_until = Some(now + self.config.reset_timeout);
        self.trips.fetch_add(1, Ordering::Relaxed);
        warn!(circuit = %self.name, "Circuit breaker forced open");
        crate::metrics::set_circuit_state(&self.name, CircuitState::Open as u8);
    }

    /// Return to a fresh closed state.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
        crate::metrics::set_circuit_state(&self.name, CircuitState::Closed as u8);
    }

    /// Count a remote attempt that was suppressed because the circuit is open.
    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        debug!(circuit = %self.name, "Circuit breaker suppressed remote attempt (open)");
        crate::metrics::record_circuit_breaker_call(&self.name, "rejected");
    }

    /// Get total number of recorded outcomes (rejections excluded)
    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.successes() + self.failures()
    }

    /// Get number of successful calls
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Get number of recorded failures
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures_total.load(Ordering::Relaxed)
    }

    /// Get number of rejected calls (circuit open)
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Get number of times the circuit opened
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(cb: &CircuitBreaker) -> CircuitState {
        cb.handle_sync_error(&"remote down")
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_exactly_at_threshold() {
        let cb = CircuitBreaker::with_defaults("test");

        assert_eq!(fail(&cb), CircuitState::Closed);
        assert_eq!(fail(&cb), CircuitState::Closed);
        assert!(cb.is_closed());
        assert_eq!(fail(&cb), CircuitState::Open);

        let snap = cb.snapshot();
        assert!(snap.is_open);
        assert_eq!(snap.failures, 3);
        assert_eq!(snap.max_failures, 3);
        assert_eq!(snap.open_until, snap.last_failure.map(|t| t + Duration::from_secs(60)));
        assert!(!cb.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_open_until_cooldown() {
        let cb = CircuitBreaker::with_defaults("test");
        cb.trip();

        tokio::time::advance(Duration::from_millis(59_999)).await;
        assert!(!cb.is_closed());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.is_closed());
        let snap = cb.snapshot();
        assert_eq!(snap.failures, 0);
        assert!(!snap.is_open);
        assert_eq!(snap.open_until, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_while_open_do_not_extend_cooldown() {
        let cb = CircuitBreaker::with_defaults("test");
        for _ in 0..3 {
            fail(&cb);
        }
        let open_until = cb.snapshot().open_until;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(fail(&cb), CircuitState::Open);

        let snap = cb.snapshot();
        assert_eq!(snap.open_until, open_until);
        assert_eq!(snap.failures, 4);
        assert_eq!(snap.last_failure, Some(Instant::now()));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(cb.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = CircuitBreaker::with_defaults("test");
        fail(&cb);
        fail(&cb);
        cb.record_success();
        fail(&cb);
        fail(&cb);
        assert!(cb.is_closed());
        assert_eq!(cb.snapshot().failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_while_open_keeps_it_open() {
        let cb = CircuitBreaker::with_defaults("test");
        cb.trip();
        cb.record_success();
        assert!(!cb.is_closed());
    }

    #[tokio::test]
    async fn test_outcome_counters() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());
        cb.record_success();
        cb.record_success();
        fail(&cb);

        assert_eq!(cb.successes(), 2);
        assert_eq!(cb.failures(), 1);
        assert_eq!(cb.calls_total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_cooldown_cycle() {
        let cb = CircuitBreaker::new("test", CircuitConfig::test());

        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        cb.record_rejection();
        assert_eq!(cb.rejections(), 1);

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.trips(), 1);

        // Needs a full new run of failures to reopen
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.trips(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_immediately() {
        let cb = CircuitBreaker::with_defaults("test");
        cb.trip();
        cb.reset();
        assert!(cb.is_closed());
        assert_eq!(cb.snapshot().failures, 0);
    }

    #[test]
    fn test_config_from_engine_config() {
        let engine = SyncEngineConfig { max_failures: 7, reset_timeout_ms: 1_500, ..Default::default() };
        let config = CircuitConfig::from(&engine);
        assert_eq!(config.max_failures, 7);
        assert_eq!(config.reset_timeout, Duration::from_millis(1_500));
    }
}
