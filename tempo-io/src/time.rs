//! Sample-clock time
//!
//! The transport counts time two ways: nanoseconds of a monotonic wall
//! clock, and samples of the 48 kHz media clock. Conversions round down;
//! one sample is 20833⅓ ns, so round trips are only exact at full-second
//! boundaries.

use std::time::Instant;

/// Working media sample rate.
pub const SAMPLE_RATE: u64 = 48_000;

const NS_PER_SEC: u128 = 1_000_000_000;

pub fn ns_to_samples(ns: u64) -> u64 {
    (u128::from(ns) * u128::from(SAMPLE_RATE) / NS_PER_SEC) as u64
}

pub fn samples_to_ns(samples: u64) -> u64 {
    (u128::from(samples) * NS_PER_SEC / u128::from(SAMPLE_RATE)) as u64
}

/// Nanosecond clock anchored at an arbitrary origin.
///
/// All protocol timestamps are `now_ns()` values from one of these; tests
/// construct their own origins and never sleep.
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            origin: Instant::now(),
        }
    }

    pub fn from_origin(origin: Instant) -> Self {
        MonotonicClock { origin }
    }

    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos().try_into().unwrap_or(u64::MAX)
    }
}

/// Fixed-interval pacer driven by injected timestamps.
pub struct Pacer {
    interval_ns: u64,
    next_fire_ns: u64,
}

impl Pacer {
    pub fn new(interval_ns: u64) -> Self {
        Pacer {
            interval_ns,
            next_fire_ns: 0,
        }
    }

    /// True at most once per interval.
    pub fn try_fire(&mut self, now_ns: u64) -> bool {
        if now_ns >= self.next_fire_ns {
            self.next_fire_ns = now_ns + self.interval_ns;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_conversions() {
        assert_eq!(ns_to_samples(1_000_000_000), SAMPLE_RATE);
        assert_eq!(samples_to_ns(SAMPLE_RATE), 1_000_000_000);
        assert_eq!(ns_to_samples(2_500_000), 120); // one frame
    }

    #[test]
    fn test_conversion_rounds_down() {
        assert_eq!(ns_to_samples(20_833), 0);
        assert_eq!(ns_to_samples(20_834), 1);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_pacer_interval() {
        let mut pacer = Pacer::new(250_000_000);
        assert!(pacer.try_fire(0));
        assert!(!pacer.try_fire(100_000_000));
        assert!(!pacer.try_fire(249_999_999));
        assert!(pacer.try_fire(250_000_000));
        assert!(!pacer.try_fire(250_000_001));
    }
}
