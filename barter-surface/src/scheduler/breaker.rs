//! Per-display circuit breaker for repeated redraw failures.

use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Rendering normally
    Closed { failures: u32 },
    /// Tripped: redraws are skipped until `until`
    Open { until: Instant },
    /// Cooldown elapsed: the next redraw is a trial
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    threshold: u32,
    cooldown: Duration,
    trips: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            threshold: threshold.max(1),
            cooldown,
            trips: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn trips(&self) -> u32 {
        self.trips
    }

    pub fn consecutive_failures(&self) -> u32 {
        match self.state {
            BreakerState::Closed { failures } => failures,
            BreakerState::Open { .. } | BreakerState::HalfOpen => self.threshold,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, BreakerState::Open { .. })
    }

    /// Whether a redraw may be attempted at `now`. Moves an expired open breaker to half-open.
    pub fn allow(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => true,
            BreakerState::Open { until } if now >= until => {
                info!("circuit breaker half-open, trial redraw");
                self.state = BreakerState::HalfOpen;
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            info!("circuit breaker closed after successful trial");
        }
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Record a failure. Returns `true` if this failure tripped the breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        let failures = match self.state {
            BreakerState::Closed { failures } => failures + 1,
            BreakerState::HalfOpen => self.threshold,
            BreakerState::Open { .. } => return false,
        };

        if failures >= self.threshold {
            self.state = BreakerState::Open {
                until: now + self.cooldown,
            };
            self.trips += 1;
            warn!(failures, cooldown = ?self.cooldown, "circuit breaker tripped");
            true
        } else {
            self.state = BreakerState::Closed { failures };
            false
        }
    }
}
