//! Drift-compensated peer clock
//!
//! The receiver observes pairs of (global time, peer sample count) as frames
//! arrive. The clock models the peer's sample counter as a line through
//! those observations: an offset plus a rate near 1.0, slewed gradually so a
//! drifting peer never forces an audible pitch step. Discontinuities too
//! large to slew through are "avulsions" and force a full resync.
//!
//! All time here is in samples of the working sample rate; the caller
//! converts from nanoseconds before feeding the clock.

use crate::ewma::Ewma;
use tracing::{debug, warn};

/// Tunables, in samples at the working sample rate.
#[derive(Debug, Clone, Copy)]
pub struct ClockConfig {
    /// Modeled-vs-observed divergence that drops the clock to unsynced
    /// when no fresh samples arrive (≈200 ms at 48 kHz).
    pub max_gap: f64,
    /// Instantaneous sample-vs-model difference that forces a hard resync
    /// instead of a rate correction.
    pub avulsion_threshold: f64,
    /// Smoothing constant of the rate control loop.
    pub rate_alpha: f64,
    /// Horizon over which a rate correction should close the observed
    /// difference (≈10 s at 48 kHz).
    pub intercept_horizon: f64,
    /// Maximum deviation of the rate from 1.0 in either direction.
    pub rate_band: f64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        ClockConfig {
            max_gap: 9600.0,
            avulsion_threshold: 9600.0,
            rate_alpha: 0.01,
            intercept_horizon: 480_000.0,
            rate_band: 0.05,
        }
    }
}

/// Counters and the most recent model error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockStats {
    pub resets: u64,
    pub gaps: u64,
    pub avulsions: u64,
    pub last_clock_difference: f64,
    pub smoothed_clock_difference: f64,
}

/// Model of the peer's sample clock in local time.
pub struct Clock {
    config: ClockConfig,

    global_ts_last_update: u64,
    local_ts_last_sample: u64,

    /// Modeled local time, advanced at `rate` per global tick.
    local_clock: f64,
    rate: f64,

    synced: bool,
    smoothed_difference: Ewma,
    stats: ClockStats,
}

impl Clock {
    pub fn new(config: ClockConfig, global_ts: u64) -> Self {
        Clock {
            config,
            global_ts_last_update: global_ts,
            local_ts_last_sample: 0,
            local_clock: 0.0,
            rate: 1.0,
            synced: false,
            smoothed_difference: Ewma::new(config.rate_alpha, 0.0),
            stats: ClockStats::default(),
        }
    }

    pub fn synced(&self) -> bool {
        self.synced
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn stats(&self) -> ClockStats {
        let mut stats = self.stats;
        stats.smoothed_clock_difference = self.smoothed_difference.value();
        stats
    }

    /// Modeled local time, available only while synced.
    pub fn value(&self) -> Option<u64> {
        if self.synced {
            Some(self.local_clock.round() as u64)
        } else {
            None
        }
    }

    /// (Re)anchor the model on one observation and return to `synced`.
    pub fn reset(&mut self, global_ts: u64, local_ts: u64) {
        self.global_ts_last_update = global_ts;
        self.local_ts_last_sample = local_ts;
        self.local_clock = local_ts as f64;
        self.rate = 1.0;
        self.synced = true;
        self.smoothed_difference.reset(0.0);
        self.stats.resets += 1;
        debug!(global_ts, local_ts, "clock reset");
    }

    /// Advance the model to `global_ts` without a new observation.
    ///
    /// If the model has coasted too far past the last observed sample, the
    /// line is no longer trustworthy: drop to unsynced and count a gap.
    ///
    /// # Panics
    /// Panics if the global clock moves backwards.
    pub fn time_passes(&mut self, global_ts: u64) {
        if !self.synced {
            return;
        }

        assert!(
            global_ts >= self.global_ts_last_update,
            "global clock moved backwards"
        );

        let elapsed = (global_ts - self.global_ts_last_update) as f64;
        self.global_ts_last_update = global_ts;
        self.local_clock += elapsed * self.rate;

        let gap = self.local_clock - self.local_ts_last_sample as f64;
        if gap.abs() > self.config.max_gap {
            warn!(gap, "clock gap, dropping sync");
            self.synced = false;
            self.stats.gaps += 1;
        }
    }

    /// Feed one observation of the peer's sample counter.
    ///
    /// Small model errors slew the rate toward a line that would intercept
    /// the observations over the configured horizon. Errors beyond the
    /// avulsion threshold abandon the slew and resync from scratch.
    pub fn new_sample(&mut self, global_ts: u64, local_ts: u64) {
        self.time_passes(global_ts);

        if !self.synced {
            self.reset(global_ts, local_ts);
            return;
        }

        let difference = local_ts as f64 - self.local_clock;
        self.stats.last_clock_difference = difference;
        self.smoothed_difference.update(difference);

        if difference.abs() > self.config.avulsion_threshold {
            warn!(difference, "clock avulsion");
            self.stats.avulsions += 1;
            self.reset(global_ts, local_ts);
            return;
        }

        let intercept_rate = self.rate + difference / self.config.intercept_horizon;
        self.rate = self.config.rate_alpha * intercept_rate
            + (1.0 - self.config.rate_alpha) * self.rate;
        self.rate = self
            .rate
            .clamp(1.0 - self.config.rate_band, 1.0 + self.config.rate_band);

        self.local_ts_last_sample = local_ts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> Clock {
        Clock::new(ClockConfig::default(), 0)
    }

    #[test]
    fn test_starts_unsynced() {
        let c = clock();
        assert!(!c.synced());
        assert_eq!(c.value(), None);
    }

    #[test]
    fn test_first_sample_syncs() {
        let mut c = clock();
        c.new_sample(1_000, 500);

        assert!(c.synced());
        assert_eq!(c.value(), Some(500));
        assert_eq!(c.stats().resets, 1);
    }

    #[test]
    fn test_tracks_equal_rates() {
        let mut c = clock();
        c.new_sample(0, 0);
        for t in 1..=100u64 {
            c.new_sample(t * 480, t * 480);
        }

        assert!(c.synced());
        assert!((c.rate() - 1.0).abs() < 1e-6);
        let value = c.value().unwrap() as i64;
        assert!((value - 48_000).abs() < 10);
    }

    #[test]
    fn test_slews_toward_drifting_peer() {
        let mut c = clock();
        c.new_sample(0, 0);

        // peer runs 1% fast; stay inside the avulsion threshold per step
        for t in 1..=500u64 {
            c.new_sample(t * 480, t * 480 + t * 480 / 100);
        }

        assert!(c.synced());
        assert_eq!(c.stats().avulsions, 0);
        assert!(c.rate() > 1.0);
    }

    #[test]
    fn test_gap_drops_sync() {
        let mut c = clock();
        c.new_sample(0, 0);

        // model coasts far past the last observation
        c.time_passes(100_000);
        assert!(!c.synced());
        assert_eq!(c.stats().gaps, 1);
        assert_eq!(c.value(), None);
    }

    #[test]
    fn test_avulsion_forces_resync() {
        let mut c = clock();
        c.new_sample(0, 0);
        c.new_sample(480, 480);

        // peer's counter jumps by a minute
        c.new_sample(960, 480 + 48_000 * 60);

        let stats = c.stats();
        assert_eq!(stats.avulsions, 1);
        assert_eq!(stats.resets, 2);
        assert!(c.synced()); // resynced on the new line
        assert!((c.rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_stays_in_band() {
        let mut c = clock();
        c.new_sample(0, 0);

        // absurd but sub-avulsion drift each step
        for t in 1..=10_000u64 {
            c.new_sample(t * 480, t * 480 + t.min(9_000));
        }
        assert!(c.rate() <= 1.05);
    }

    #[test]
    #[should_panic(expected = "global clock moved backwards")]
    fn test_backwards_global_time_panics() {
        let mut c = clock();
        c.new_sample(1_000, 0);
        c.time_passes(500);
    }
}
