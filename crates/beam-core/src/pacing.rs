//! Sampling-rate gate for the display-refresh driven loop.

use std::time::{Duration, Instant};

/// Nominal detector sampling rate.
pub const DEFAULT_SAMPLE_RATE_HZ: f32 = 30.0;

/// Shortest period a rate maps to.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);
/// Longest period a rate maps to.
pub const MAX_PERIOD: Duration = Duration::from_secs(60);

/// Convert a rate in Hz into a period within [`MIN_PERIOD`, `MAX_PERIOD`].
/// Non-positive rates fall back to the default.
pub fn period_for_rate(hz: f32) -> Duration {
    let hz = if hz.is_finite() && hz > 0.0 {
        hz
    } else {
        DEFAULT_SAMPLE_RATE_HZ
    };
    let secs = (1.0 / hz as f64).clamp(MIN_PERIOD.as_secs_f64(), MAX_PERIOD.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Lets at most one sample through per interval.
#[derive(Debug, Clone)]
pub struct Pacer {
    interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Returns true and records `now` if a full interval has elapsed since
    /// the last accepted tick. The first call always passes.
    pub fn try_tick(&mut self, now: Instant) -> bool {
        let due = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last = Some(now);
        }
        due
    }

    pub fn last_tick(&self) -> Option<Instant> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_for_rate() {
        let p = period_for_rate(30.0);
        assert!((p.as_secs_f64() - 1.0 / 30.0).abs() < 1e-9);
        assert_eq!(period_for_rate(0.0), period_for_rate(DEFAULT_SAMPLE_RATE_HZ));
        assert_eq!(period_for_rate(-5.0), period_for_rate(DEFAULT_SAMPLE_RATE_HZ));
    }

    #[test]
    fn test_extreme_rates_are_clamped() {
        assert_eq!(period_for_rate(1e-20), MAX_PERIOD);
        assert_eq!(period_for_rate(f32::MIN_POSITIVE), MAX_PERIOD);
        assert_eq!(period_for_rate(1e12), MIN_PERIOD);
        assert_eq!(period_for_rate(f32::MAX), MIN_PERIOD);
        assert!(!period_for_rate(1e12).is_zero());
    }

    #[test]
    fn test_first_tick_passes() {
        let mut pacer = Pacer::new(period_for_rate(30.0));
        assert!(pacer.try_tick(Instant::now()));
    }

    #[test]
    fn test_ticks_inside_interval_skipped() {
        let mut pacer = Pacer::new(period_for_rate(30.0));
        let t0 = Instant::now();
        assert!(pacer.try_tick(t0));
        assert!(!pacer.try_tick(t0 + Duration::from_millis(10)));
        assert!(!pacer.try_tick(t0 + Duration::from_millis(33)));
        assert!(pacer.try_tick(t0 + Duration::from_millis(34)));
        // interval is measured from the last accepted tick
        assert!(!pacer.try_tick(t0 + Duration::from_millis(50)));
        assert_eq!(pacer.last_tick(), Some(t0 + Duration::from_millis(34)));
    }

    #[test]
    fn test_skipped_tick_does_not_move_timestamp() {
        let mut pacer = Pacer::new(Duration::from_millis(20));
        let t0 = Instant::now();
        pacer.try_tick(t0);
        pacer.try_tick(t0 + Duration::from_millis(5));
        assert_eq!(pacer.last_tick(), Some(t0));
    }
}
