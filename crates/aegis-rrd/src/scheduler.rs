//! Aegis RRD Flush Scheduler
//!
//! Debounce state for snapshot flushes, owned by the store instance.
//! Transitions are `Disarmed -> Armed -> Firing -> Disarmed`; arming only
//! happens from `Disarmed`, so writes that land while a flush is armed or in
//! flight never schedule a second one.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::time::{Duration, Instant};

/// Current state of the debounce timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Disarmed,
    Armed { deadline: Instant },
    Firing,
}

/// Coalesces bursts of writes into a single delayed flush.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    delay: Duration,
    state: FlushState,
}

impl FlushScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: FlushState::Disarmed,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// True while a flush is armed or running.
    pub fn is_pending(&self) -> bool {
        !matches!(self.state, FlushState::Disarmed)
    }

    /// Arm the timer. Returns true only on the `Disarmed -> Armed` transition.
    pub fn arm(&mut self, now: Instant) -> bool {
        if self.is_pending() {
            return false;
        }
        self.state = FlushState::Armed {
            deadline: now + self.delay,
        };
        true
    }

    /// Whether an armed flush has reached its deadline.
    pub fn due(&self, now: Instant) -> bool {
        matches!(self.state, FlushState::Armed { deadline } if now >= deadline)
    }

    /// Move an armed flush into the firing state.
    pub fn begin_fire(&mut self) -> bool {
        if let FlushState::Armed { .. } = self.state {
            self.state = FlushState::Firing;
            true
        } else {
            false
        }
    }

    /// The flush finished, successfully or not.
    pub fn complete(&mut self) {
        self.state = FlushState::Disarmed;
    }
}

// =============================================================================
// Tests
// =============================================================================
