use std::time::{Duration, Instant};

/// Abstraction over a time source to improve testability.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time instant.
    fn now(&self) -> Instant;
}

/// System clock using `Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Accumulator-based interval timer driven by elapsed-time deltas.
///
/// The caller feeds it the time step of each loop iteration; the timer fires
/// once the accumulated time crosses the configured interval and carries the
/// remainder over, so firing cadence stays stable under uneven tick lengths.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    accumulator: Duration,
    interval: Duration,
}

impl IntervalTimer {
    /// Creates a timer that fires every `interval`.
    pub fn new(interval: Duration) -> Self {
        Self { accumulator: Duration::ZERO, interval }
    }

    /// Adds `dt` to the accumulator; returns true when the interval elapsed.
    pub fn advance(&mut self, dt: Duration) -> bool {
        self.accumulator += dt;
        if self.accumulator < self.interval {
            return false;
        }
        self.accumulator -= self.interval;
        true
    }

    /// Clears accumulated time.
    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }

    /// Returns the configured interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_after_interval() {
        let mut timer = IntervalTimer::new(Duration::from_millis(100));
        assert!(!timer.advance(Duration::from_millis(60)));
        assert!(timer.advance(Duration::from_millis(60)));
    }

    #[test]
    fn keeps_remainder() {
        let mut timer = IntervalTimer::new(Duration::from_millis(100));
        assert!(timer.advance(Duration::from_millis(150)));
        // 50ms already accumulated, so another 50ms fires again.
        assert!(timer.advance(Duration::from_millis(50)));
    }

    #[test]
    fn reset_clears_accumulator() {
        let mut timer = IntervalTimer::new(Duration::from_millis(100));
        timer.advance(Duration::from_millis(90));
        timer.reset();
        assert!(!timer.advance(Duration::from_millis(90)));
    }
}
