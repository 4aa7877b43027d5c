//! Circuit breaker around the narration backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Whether the session is getting generated prose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    GenerativeAvailable,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls go through.
    Closed,
    /// Calls are skipped until the cooldown (if any) runs out.
    Open { since: Instant },
    /// The cooldown ran out; the next call is a probe.
    HalfOpen,
}

/// Counts consecutive narration failures and stops calling the backend once
/// `threshold` is reached. Without a cooldown the breaker stays open for the
/// rest of the session.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Option<Duration>,
    consecutive_failures: u32,
    state: BreakerState,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(1, None)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Option<Duration>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive_failures: 0,
            state: BreakerState::Closed,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn mode(&self) -> SessionMode {
        match self.state {
            BreakerState::Closed => SessionMode::GenerativeAvailable,
            BreakerState::Open { .. } | BreakerState::HalfOpen => SessionMode::Degraded,
        }
    }

    /// Whether a call should be attempted now. Moves an expired open breaker
    /// to half-open.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open { since } => match self.cooldown {
                Some(cooldown) if since.elapsed() >= cooldown => {
                    info!("narration cooldown elapsed, probing backend");
                    self.state = BreakerState::HalfOpen;
                    true
                }
                _ => false,
            },
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            info!("narration backend recovered");
        }
        self.consecutive_failures = 0;
        self.state = BreakerState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            BreakerState::HalfOpen => {
                warn!("narration probe failed, staying degraded");
                self.state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Closed if self.consecutive_failures >= self.threshold => {
                warn!(
                    failures = self.consecutive_failures,
                    "narration failing, switching to degraded mode"
                );
                self.state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            _ => {}
        }
    }
}
