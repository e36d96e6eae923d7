//! Per-agent circuit breaker.
//!
//! The breaker is plain data: every method takes the current [`Instant`], so the
//! whole state machine can be driven in tests without sleeping.
//!
//! - `Closed` passes calls through and counts consecutive failures that land
//!   inside one window
//! - `Open` short-circuits every call until the cooldown has elapsed
//! - `HalfOpen` lets exactly one probe through; success closes the breaker,
//!   failure re-opens it. A probe that never reports back (its caller was
//!   cancelled) is released by [`CircuitBreaker::abandon_probe`] or, failing
//!   that, expires after one cooldown

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::BreakerConfig;

// ============================================================================
// BreakerState
// ============================================================================

/// Position of a breaker in its state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls are refused until the cooldown ends.
    Open,
    /// One probe call is allowed.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker, as shown on `/health/detailed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Failures counted in the current window.
    pub consecutive_failures: u32,
    /// Failures recorded since start-up.
    pub total_failures: u64,
    /// Seconds until an open breaker admits a probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Most recent failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl BreakerSnapshot {
    /// Whether the breaker is refusing or rationing calls.
    ///
    /// A half-open breaker counts as degraded until its probe succeeds.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        !matches!(self.state, BreakerState::Closed)
    }
}

// ============================================================================
// CircuitBreaker
// ============================================================================

/// Failure-counting breaker guarding one agent.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    cooldown: Duration,
    state: BreakerState,
    failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
    total_failures: u64,
    last_error: Option<String>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            window: Duration::from_secs(config.window_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
            state: BreakerState::Closed,
            failures: 0,
            window_start: None,
            opened_at: None,
            probe_started: None,
            total_failures: 0,
            last_error: None,
        }
    }

    /// Current state, without advancing time.
    #[must_use]
    pub const fn state(&self) -> BreakerState {
        self.state
    }

    /// Asks to make a call at `now`.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and admits
    /// the caller as its single probe.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if self.cooldown_elapsed(now) {
                    self.state = BreakerState::HalfOpen;
                    self.probe_started = Some(now);
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_pending(now) {
                    false
                } else {
                    if self.probe_started.is_some() {
                        tracing::warn!("stale circuit breaker probe replaced");
                    }
                    self.probe_started = Some(now);
                    true
                }
            }
        }
    }

    /// Releases a half-open probe whose caller went away without reporting.
    ///
    /// The next caller becomes the probe. Has no effect in other states.
    pub fn abandon_probe(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.probe_started = None;
        }
    }

    /// Records a successful call.
    pub fn record_success(&mut self, _now: Instant) {
        self.state = BreakerState::Closed;
        self.failures = 0;
        self.window_start = None;
        self.opened_at = None;
        self.probe_started = None;
    }

    /// Records a failed call.
    pub fn record_failure(&mut self, now: Instant, error: impl Into<String>) {
        self.total_failures += 1;
        self.last_error = Some(error.into());

        match self.state {
            BreakerState::Closed => {
                let in_window = self
                    .window_start
                    .is_some_and(|start| now.saturating_duration_since(start) <= self.window);
                if in_window {
                    self.failures += 1;
                } else {
                    self.window_start = Some(now);
                    self.failures = 1;
                }
                if self.failures >= self.threshold {
                    self.trip(now);
                }
            }
            BreakerState::HalfOpen => self.trip(now),
            BreakerState::Open => {}
        }
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let retry_after_secs = match (self.state, self.opened_at) {
            (BreakerState::Open, Some(opened)) => Some(
                self.cooldown
                    .saturating_sub(now.saturating_duration_since(opened))
                    .as_secs(),
            ),
            _ => None,
        };
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.failures,
            total_failures: self.total_failures,
            retry_after_secs,
            last_error: self.last_error.clone(),
        }
    }

    fn trip(&mut self, now: Instant) {
        tracing::warn!(failures = self.failures, "circuit breaker opened");
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.probe_started = None;
    }

    fn probe_pending(&self, now: Instant) -> bool {
        self.probe_started
            .is_some_and(|started| now.saturating_duration_since(started) < self.cooldown)
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .map_or(true, |opened| now.saturating_duration_since(opened) >= self.cooldown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            window_secs: 60,
            cooldown_secs: 30,
        })
    }

    #[test]
    fn opens_after_threshold_failures_in_window() {
        let mut b = breaker();
        let t0 = Instant::now();
        for i in 0..2 {
            assert!(b.try_acquire(t0));
            b.record_failure(t0 + Duration::from_secs(i), "boom");
        }
        assert_eq!(b.state(), BreakerState::Closed);

        b.record_failure(t0 + Duration::from_secs(5), "boom");
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn failures_outside_window_restart_the_count() {
        let mut b = breaker();
        let t0 = Instant::now();
        b.record_failure(t0, "a");
        b.record_failure(t0 + Duration::from_secs(1), "b");
        b.record_failure(t0 + Duration::from_secs(120), "c");
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.snapshot(t0).consecutive_failures, 1);
    }

    #[test]
    fn success_resets_the_count() {
        let mut b = breaker();
        let t0 = Instant::now();
        b.record_failure(t0, "a");
        b.record_failure(t0, "b");
        b.record_success(t0);
        b.record_failure(t0, "c");
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_a_single_probe() {
        let mut b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0, "down");
        }
        let later = t0 + Duration::from_secs(31);
        assert!(b.try_acquire(later));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(!b.try_acquire(later));
    }

    #[test]
    fn probe_success_closes_and_probe_failure_reopens() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(31);

        let mut ok = breaker();
        for _ in 0..3 {
            ok.record_failure(t0, "down");
        }
        assert!(ok.try_acquire(later));
        ok.record_success(later);
        assert_eq!(ok.state(), BreakerState::Closed);
        assert!(ok.try_acquire(later));

        let mut bad = breaker();
        for _ in 0..3 {
            bad.record_failure(t0, "down");
        }
        assert!(bad.try_acquire(later));
        bad.record_failure(later, "still down");
        assert_eq!(bad.state(), BreakerState::Open);
        assert!(!bad.try_acquire(later + Duration::from_secs(1)));
    }

    #[test]
    fn abandoned_probe_admits_the_next_caller() {
        let mut b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0, "down");
        }
        let later = t0 + Duration::from_secs(31);
        assert!(b.try_acquire(later));
        b.abandon_probe();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.try_acquire(later));
        assert!(!b.try_acquire(later));
        b.record_success(later);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn unreported_probe_expires_after_cooldown() {
        let mut b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0, "down");
        }
        let probe_at = t0 + Duration::from_secs(31);
        assert!(b.try_acquire(probe_at));
        assert!(!b.try_acquire(probe_at + Duration::from_secs(29)));
        assert!(b.try_acquire(probe_at + Duration::from_secs(30)));
        assert_eq!(b.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn only_closed_breakers_are_healthy() {
        let mut b = breaker();
        let t0 = Instant::now();
        assert!(!b.snapshot(t0).is_degraded());
        for _ in 0..3 {
            b.record_failure(t0, "down");
        }
        assert!(b.snapshot(t0).is_degraded());
        let later = t0 + Duration::from_secs(31);
        assert!(b.try_acquire(later));
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert!(b.snapshot(later).is_degraded());
    }

    #[test]
    fn snapshot_reports_retry_after() {
        let mut b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure(t0, "timeout");
        }
        let snap = b.snapshot(t0 + Duration::from_secs(10));
        assert_eq!(snap.state, BreakerState::Open);
        assert_eq!(snap.retry_after_secs, Some(20));
        assert_eq!(snap.total_failures, 3);
        assert_eq!(snap.last_error.as_deref(), Some("timeout"));
    }
}
