use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use quorum_core::timestamp_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation; requests flow through.
    Closed,
    /// Target is failing; requests are rejected until the open timeout.
    Open,
    /// Probing recovery with limited traffic.
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: i64,
    pub last_state_change: i64,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: i64,
    last_state_change: i64,
}

/// Three-state failure detector for one target.
///
/// Closed: successes reset the failure count; `failure_threshold`
/// consecutive failures trip it open. Open: rejects until
/// `open_timeout_ms` elapses, then the next `allow_request` transitions to
/// half-open and admits a probe. Half-open: `success_threshold` successes
/// close it; any failure reopens it immediately.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    open_timeout_ms: i64,
    success_threshold: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, 60_000, 2)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout_ms: i64, success_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: 0,
                last_state_change: timestamp_ms(),
            }),
            failure_threshold,
            open_timeout_ms,
            success_threshold,
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_state_change = timestamp_ms();
                }
            }
            BreakerState::Closed => inner.failure_count = 0,
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.last_failure_time = timestamp_ms();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.last_state_change = timestamp_ms();
                    warn!(
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.last_state_change = timestamp_ms();
            }
            BreakerState::Open => {}
        }
    }

    /// Whether a request may be sent right now. An open breaker whose
    /// timeout has elapsed atomically moves to half-open and admits the
    /// caller as the probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let now = timestamp_ms();
                if now - inner.last_state_change >= self.open_timeout_ms {
                    inner.state = BreakerState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_state_change = now;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => true,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_state_change = timestamp_ms();
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            last_state_change: inner.last_state_change,
        }
    }
}
