use std::time::Duration;

use tracing::{info, warn};

/// Consecutive-failure circuit breaker for the acquisition loop.
///
/// A missing or wedged camera makes every `next_frame` call fail at once;
/// without a ceiling the loop would spin and flood the log. After
/// `threshold` failures in a row each further failure asks for a cooldown
/// pause. The first success closes the breaker again.
#[derive(Debug, Clone)]
pub struct FailureBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive: u32,
}

impl FailureBreaker {
    /// `threshold == 0` disables the breaker.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            consecutive: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.threshold > 0 && self.consecutive >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        if self.is_open() {
            info!(
                failures = self.consecutive,
                "Camera recovered, resuming full-rate acquisition"
            );
        }
        self.consecutive = 0;
    }

    /// Returns how long to pause before the next attempt, if at all.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.threshold == 0 || self.consecutive < self.threshold {
            return None;
        }
        if self.consecutive == self.threshold {
            warn!(
                failures = self.consecutive,
                cooldown = ?self.cooldown,
                "Camera failing repeatedly, backing off between attempts"
            );
        }
        Some(self.cooldown)
    }
}

impl Default for FailureBreaker {
    fn default() -> Self {
        Self::new(30, Duration::from_secs(1))
    }
}
