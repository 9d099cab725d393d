//! Rolling attempt budget

use crate::errors::TypesError;
use std::time::{Duration, Instant};

/// Broadcast attempts allowed inside a rolling window
///
/// Only broadcasts count. Sizing and simulation rejections never touch the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptBudget {
    window_start: Instant,
    window: Duration,
    attempts_used: u32,
    attempts_max: u32,
}

impl AttemptBudget {
    pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(attempts_max: u32, window: Duration, now: Instant) -> Result<Self, TypesError> {
        if attempts_max == 0 {
            return Err(TypesError::InvalidBudget("attempts_max must be positive".into()));
        }
        if window.is_zero() {
            return Err(TypesError::InvalidBudget("window must be non-zero".into()));
        }
        Ok(Self {
            window_start: now,
            window,
            attempts_used: 0,
            attempts_max,
        })
    }

    /// Start a fresh window once the current one has elapsed
    pub fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.attempts_used = 0;
        }
    }

    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.roll(now);
        self.attempts_used < self.attempts_max
    }

    /// Count one broadcast
    pub fn record_broadcast(&mut self, now: Instant) {
        self.roll(now);
        self.attempts_used = self.attempts_used.saturating_add(1);
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn attempts_max(&self) -> u32 {
        self.attempts_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_resets_after_elapsing() {
        let start = Instant::now();
        let mut budget = AttemptBudget::new(2, AttemptBudget::DAY, start).unwrap();

        budget.record_broadcast(start);
        budget.record_broadcast(start);
        assert!(!budget.has_capacity(start + Duration::from_secs(60)));

        let next_day = start + AttemptBudget::DAY;
        assert!(budget.has_capacity(next_day));
        assert_eq!(budget.attempts_used(), 0);
    }

    #[test]
    fn test_zero_budget_rejected() {
        assert!(AttemptBudget::new(0, AttemptBudget::DAY, Instant::now()).is_err());
    }
}
