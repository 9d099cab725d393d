//! Lock-free per-window request counter
//!
//! Window index and count share one `AtomicU64` (high and low 32 bits) so rolling
//! over to a new window and counting a request happen in a single compare-and-swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Self-imposed ceiling of `ceiling` requests per `window`
#[derive(Debug)]
pub struct WindowCounter {
    state: AtomicU64,
    origin: Instant,
    window: Duration,
    ceiling: u32,
}

#[inline]
fn pack(window_index: u32, count: u32) -> u64 {
    ((window_index as u64) << 32) | count as u64
}

#[inline]
fn unpack(state: u64) -> (u32, u32) {
    ((state >> 32) as u32, state as u32)
}

impl WindowCounter {
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self::starting_at(ceiling, window, Instant::now())
    }

    pub fn per_minute(ceiling: u32) -> Self {
        Self::new(ceiling, Duration::from_secs(60))
    }

    pub fn starting_at(ceiling: u32, window: Duration, origin: Instant) -> Self {
        Self {
            state: AtomicU64::new(pack(0, 0)),
            origin,
            window: window.max(Duration::from_millis(1)),
            ceiling,
        }
    }

    fn window_index(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.origin);
        (elapsed.as_millis() / self.window.as_millis()) as u32
    }

    fn until_next_window(&self, now: Instant) -> Duration {
        let next = self.origin + self.window * (self.window_index(now) + 1);
        next.saturating_duration_since(now)
    }

    /// Count one request, or report how long until the window rolls over
    pub fn try_acquire(&self, now: Instant) -> Result<u32, Duration> {
        let index = self.window_index(now);
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (seen_index, count) = unpack(current);
            let next = if seen_index != index {
                pack(index, 1)
            } else if count >= self.ceiling {
                return Err(self.until_next_window(now));
            } else {
                pack(index, count + 1)
            };

            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(unpack(next).1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Requests counted in the window containing `now`
    pub fn current(&self, now: Instant) -> u32 {
        let (seen_index, count) = unpack(self.state.load(Ordering::Acquire));
        if seen_index == self.window_index(now) {
            count
        } else {
            0
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_ceiling_and_rollover() {
        let origin = Instant::now();
        let counter = WindowCounter::starting_at(2, Duration::from_secs(60), origin);

        assert_eq!(counter.try_acquire(origin), Ok(1));
        assert_eq!(counter.try_acquire(origin), Ok(2));
        let wait = counter.try_acquire(origin + Duration::from_secs(10)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(50));

        let next_minute = origin + Duration::from_secs(61);
        assert_eq!(counter.current(next_minute), 0);
        assert_eq!(counter.try_acquire(next_minute), Ok(1));
    }

    #[test]
    fn test_concurrent_acquire_never_overshoots() {
        let origin = Instant::now();
        let counter = Arc::new(WindowCounter::starting_at(1_000, Duration::from_secs(3600), origin));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    (0..500).filter(|_| counter.try_acquire(origin).is_ok()).count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 1_000);
        assert_eq!(counter.current(origin), 1_000);
    }
}
