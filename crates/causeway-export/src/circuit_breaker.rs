//! Circuit breaker
//!
//! Stops sending to a collector that keeps failing.
//!
//! # States
//!
//! - **Closed**: requests go through; consecutive failures are counted
//! - **Open**: requests are rejected without touching the network
//! - **Half-open**: a bounded number of probes test whether the collector recovered

use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket for one request let through by the breaker.
///
/// Every admission must be settled with exactly one of
/// [`CircuitBreaker::record_success`], [`CircuitBreaker::record_failure`],
/// [`CircuitBreaker::record_neutral`] or [`CircuitBreaker::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Admission {
    /// Normal request while closed
    Normal,
    /// Probe while half-open
    Probe,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

/// Thread-safe circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_timeout: Duration,
    max_probes: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration, max_probes: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            max_probes: max_probes.max(1),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            }),
        }
    }

    /// Current state. The open to half-open transition happens on the next call to [`try_acquire`](Self::try_acquire).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Whether a request made now would be turned away without probing
    pub fn is_rejecting(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == CircuitState::Open
            && inner
                .opened_at
                .is_some_and(|at| at.elapsed() < self.open_timeout)
    }

    /// Ask to send a request. `None` means the circuit is open (or every probe slot is taken).
    pub fn try_acquire(&self) -> Option<Admission> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| at.elapsed())
                .unwrap_or(self.open_timeout);
            if elapsed < self.open_timeout {
                return None;
            }
            info!("Circuit breaker half-open, probing collector");
            inner.state = CircuitState::HalfOpen;
            inner.probes_in_flight = 0;
        }

        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::HalfOpen if inner.probes_in_flight < self.max_probes => {
                inner.probes_in_flight += 1;
                Some(Admission::Probe)
            }
            _ => None,
        }
    }

    /// The collector accepted the request
    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        self.settle_probe(&mut inner, admission);

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if admission == Admission::Probe => {
                info!("Circuit breaker closed, collector recovered");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probes_in_flight = 0;
            }
            _ => {}
        }
    }

    /// The collector looks unavailable (network error, timeout, 5xx)
    pub fn record_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        self.settle_probe(&mut inner, admission);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        failures = inner.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker probe failed, reopening");
                inner.consecutive_failures += 1;
                self.open(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// The collector answered but rejected the request (4xx). A normal request
    /// leaves the failure count alone; a probe frees its slot without closing the
    /// circuit, so the next request probes again.
    pub fn record_neutral(&self, admission: Admission) {
        self.release(admission);
    }

    /// The request was never sent
    pub fn release(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        self.settle_probe(&mut inner, admission);
    }

    fn settle_probe(&self, inner: &mut Inner, admission: Admission) {
        if admission == Admission::Probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probes_in_flight = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(10), 1)
    }

    fn fail(breaker: &CircuitBreaker) {
        let admission = breaker.try_acquire().expect("admitted");
        breaker.record_failure(admission);
    }

    #[test]
    fn test_opens_after_exact_threshold() {
        let breaker = breaker();
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 2);

        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_none());
        assert!(breaker.is_rejecting());
    }

    #[test]
    fn test_success_resets_count() {
        let breaker = breaker();
        fail(&breaker);
        fail(&breaker);
        let admission = breaker.try_acquire().unwrap();
        breaker.record_success(admission);
        fail(&breaker);
        fail(&breaker);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_neutral_does_not_count() {
        let breaker = breaker();
        for _ in 0..10 {
            let admission = breaker.try_acquire().unwrap();
            breaker.record_neutral(admission);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_close() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker);
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(breaker.try_acquire().is_none());
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!breaker.is_rejecting());
        let probe = breaker.try_acquire().unwrap();
        assert_eq!(probe, Admission::Probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // only one probe at a time
        assert!(breaker.try_acquire().is_none());

        breaker.record_success(probe);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.try_acquire(), Some(Admission::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_and_restarts_timeout() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = breaker.try_acquire().unwrap();
        breaker.record_failure(probe);
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.try_acquire().is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(breaker.try_acquire(), Some(Admission::Probe));
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_probe_frees_slot() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = breaker.try_acquire().unwrap();
        breaker.release(probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let probe = breaker.try_acquire().unwrap();
        breaker.record_success(probe);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_probe_keeps_half_open() {
        let breaker = breaker();
        for _ in 0..3 {
            fail(&breaker);
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        let probe = breaker.try_acquire().unwrap();
        breaker.record_neutral(probe);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let probe = breaker.try_acquire().unwrap();
        assert_eq!(probe, Admission::Probe);
        breaker.record_success(probe);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
