//! Adaptive playout cursor
//!
//! The cursor walks the received frame store on a fixed-period schedule and
//! asks the decoder for one frame per tick, present or not. Around that
//! loop sit three controllers at three timescales: a per-tick micro-nudge
//! that shifts the schedule by one sample period to track small drift, a
//! slow hysteretic adjustment of the target buffering delay driven by
//! decode quality, and a hard reset that re-anchors at the frontier when
//! the safety margin has collapsed or ballooned beyond repair.

use crate::ewma::Ewma;
use tempo_protocol::{FrameStore, MediaFrame};
use tracing::{debug, warn};

/// Playout period of one frame: 120 samples at 48 kHz.
pub const FRAME_DURATION_NS: u64 = 2_500_000;

/// Duration of a single sample at 48 kHz, the micro-nudge quantum.
pub const SAMPLE_PERIOD_NS: u64 = 20_833;

/// Produces audible output for each scheduled frame slot.
///
/// A missing frame is a quality event, not an error: the decoder is asked
/// for a plausible filler (packet-loss concealment, silence, repeat).
pub trait FrameDecoder<F> {
    fn decode(&mut self, frame: &F);
    fn decode_missing(&mut self);
}

/// Strategy for small schedule corrections.
///
/// Called with the signed number of samples the playout position should
/// drift this tick (+1 = play later, buffer more); returns the adjustment
/// in nanoseconds to this tick's schedule increment. A time-stretching
/// engine can implement this smoothly; the default shifts the schedule by
/// whole sample periods.
pub trait CorrectionPolicy {
    fn micro_correct(&mut self, delta_samples: i64) -> i64;
}

/// Shift the schedule by one sample period per tick, with no resampling.
#[derive(Debug, Default)]
pub struct DiscreteNudge;

impl CorrectionPolicy for DiscreteNudge {
    fn micro_correct(&mut self, delta_samples: i64) -> i64 {
        delta_samples.signum() * SAMPLE_PERIOD_NS as i64
    }
}

/// Controller tunables. The defaults are hand-tuned for 48 kHz audio in
/// 2.5 ms frames.
#[derive(Debug, Clone, Copy)]
pub struct CursorTuning {
    pub initial_target_delay_ns: u64,
    pub min_target_delay_ns: u64,
    pub max_target_delay_ns: u64,
    /// EWMA constant of the decode-success quality score.
    pub quality_alpha: f64,
    pub fast_margin_alpha: f64,
    pub slow_margin_alpha: f64,
    /// Instantaneous margin deviation (fraction of target) that abandons
    /// the schedule entirely.
    pub hard_reset_ratio: f64,
    /// Fast-average margin deviation (fraction of target) that triggers a
    /// per-tick micro-correction.
    pub nudge_ratio: f64,
    /// Minimum spacing between target-delay adjustments.
    pub adapt_interval_ns: u64,
    /// Quality below this raises the target delay.
    pub quality_floor: f64,
    /// Quality above this (with comfortable margin) lowers it.
    pub quality_ceiling: f64,
    /// Multiplicative step for target-delay changes.
    pub delay_step: f64,
}

impl Default for CursorTuning {
    fn default() -> Self {
        CursorTuning {
            initial_target_delay_ns: 60_000_000,
            min_target_delay_ns: 10_000_000,
            max_target_delay_ns: 480_000_000,
            quality_alpha: 0.02,
            fast_margin_alpha: 0.01,
            slow_margin_alpha: 0.001,
            hard_reset_ratio: 0.75,
            nudge_ratio: 0.25,
            adapt_interval_ns: 10_000_000_000,
            quality_floor: 0.98,
            quality_ceiling: 0.998,
            delay_step: 1.05,
        }
    }
}

/// Cursor state snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorStats {
    pub resets: u64,
    pub frames_decoded: u64,
    pub frames_missing: u64,
    pub nudges_slower: u64,
    pub nudges_faster: u64,
    pub delay_raises: u64,
    pub delay_lowers: u64,
    pub quality: f64,
    pub fast_margin_ns: f64,
    pub slow_margin_ns: f64,
    pub target_delay_ns: u64,
}

struct Schedule {
    next_frame_index: u32,
    next_frame_ts_ns: u64,
}

/// The playout scheduler for one inbound stream.
pub struct Cursor {
    tuning: CursorTuning,
    target_delay_ns: f64,

    schedule: Option<Schedule>,
    quality: Ewma,
    fast_margin: Ewma,
    slow_margin: Ewma,
    last_adapt_ns: u64,

    stats: CursorStats,
}

impl Cursor {
    pub fn new(tuning: CursorTuning) -> Self {
        let target = tuning.initial_target_delay_ns as f64;
        Cursor {
            tuning,
            target_delay_ns: target,
            schedule: None,
            quality: Ewma::new(tuning.quality_alpha, 1.0),
            fast_margin: Ewma::new(tuning.fast_margin_alpha, target),
            slow_margin: Ewma::new(tuning.slow_margin_alpha, target),
            last_adapt_ns: 0,
            stats: CursorStats::default(),
        }
    }

    pub fn active(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn target_delay_ns(&self) -> u64 {
        self.target_delay_ns.round() as u64
    }

    pub fn stats(&self) -> CursorStats {
        let mut stats = self.stats;
        stats.quality = self.quality.value();
        stats.fast_margin_ns = self.fast_margin.value();
        stats.slow_margin_ns = self.slow_margin.value();
        stats.target_delay_ns = self.target_delay_ns();
        stats
    }

    /// Run the playout loop up to `now_ns`.
    ///
    /// Dormant until the store's frontier first moves; from then on, every
    /// elapsed frame period produces exactly one decode (real or filler).
    pub fn tick<F, D, P>(
        &mut self,
        store: &FrameStore<F>,
        now_ns: u64,
        decoder: &mut D,
        policy: &mut P,
    ) where
        F: MediaFrame,
        D: FrameDecoder<F>,
        P: CorrectionPolicy,
    {
        if self.schedule.is_none() {
            if store.frontier() == 0 {
                return;
            }
            self.start_schedule(store.frontier(), now_ns);
            return;
        }

        while self
            .schedule
            .as_ref()
            .is_some_and(|s| now_ns >= s.next_frame_ts_ns)
        {
            self.tick_once(store, now_ns, decoder, policy);
        }
    }

    /// How many of the store's oldest frames the cursor has played past and
    /// will never read again. Capped at the contiguous prefix so eviction
    /// can't outrun frames still owed an acknowledgment.
    pub fn ok_to_pop<F: MediaFrame>(&self, store: &FrameStore<F>) -> u32 {
        match &self.schedule {
            Some(schedule) => schedule
                .next_frame_index
                .min(store.next_frame_needed())
                .saturating_sub(store.range_begin()),
            None => 0,
        }
    }

    fn start_schedule(&mut self, frontier: u32, now_ns: u64) {
        debug!(
            frontier,
            target_delay_ns = self.target_delay_ns(),
            "cursor anchored at frontier"
        );
        self.fast_margin.reset(self.target_delay_ns);
        self.slow_margin.reset(self.target_delay_ns);
        self.schedule = Some(Schedule {
            next_frame_index: frontier,
            next_frame_ts_ns: now_ns + self.target_delay_ns.round() as u64,
        });
    }

    fn tick_once<F, D, P>(&mut self, store: &FrameStore<F>, now_ns: u64, decoder: &mut D, policy: &mut P)
    where
        F: MediaFrame,
        D: FrameDecoder<F>,
        P: CorrectionPolicy,
    {
        let Some(schedule) = self.schedule.as_mut() else {
            return;
        };
        let index = schedule.next_frame_index;

        let frame = if index < store.frontier() && store.has(index) {
            store.at(index)
        } else {
            None
        };
        match frame {
            Some(frame) => {
                decoder.decode(frame);
                self.quality.update(1.0);
                self.stats.frames_decoded += 1;
            }
            None => {
                decoder.decode_missing();
                self.quality.update(0.0);
                self.stats.frames_missing += 1;
            }
        }

        let margin_ns =
            (store.frontier() as i64 - index as i64) as f64 * FRAME_DURATION_NS as f64;
        self.fast_margin.update(margin_ns);
        self.slow_margin.update(margin_ns);

        // margin beyond repair by nudging: abandon the schedule
        if (self.target_delay_ns - margin_ns).abs() > self.tuning.hard_reset_ratio * self.target_delay_ns
        {
            let undershot = margin_ns < self.target_delay_ns;
            warn!(margin_ns, undershot, "cursor hard reset");
            self.stats.resets += 1;
            self.schedule = None;
            if undershot {
                self.raise_target_delay();
            }
            return;
        }

        if now_ns.saturating_sub(self.last_adapt_ns) >= self.tuning.adapt_interval_ns {
            self.last_adapt_ns = now_ns;
            if self.quality.value() < self.tuning.quality_floor {
                self.raise_target_delay();
            } else if self.quality.value() > self.tuning.quality_ceiling
                && self.slow_margin.value() > 1.25 * self.tuning.min_target_delay_ns as f64
            {
                self.target_delay_ns = (self.target_delay_ns / self.tuning.delay_step)
                    .max(self.tuning.min_target_delay_ns as f64);
                self.stats.delay_lowers += 1;
            }
        }

        let mut increment = FRAME_DURATION_NS as i64;
        let band = self.tuning.nudge_ratio * self.target_delay_ns;
        if self.target_delay_ns - self.fast_margin.value() > band {
            // running lean: stretch the schedule so the buffer refills
            increment += policy.micro_correct(1);
            self.stats.nudges_slower += 1;
        } else if self.fast_margin.value() - self.target_delay_ns > band {
            increment += policy.micro_correct(-1);
            self.stats.nudges_faster += 1;
        }

        if let Some(schedule) = self.schedule.as_mut() {
            schedule.next_frame_ts_ns = schedule.next_frame_ts_ns.saturating_add_signed(increment);
            schedule.next_frame_index += 1;
        }
    }

    fn raise_target_delay(&mut self) {
        self.target_delay_ns =
            (self.target_delay_ns * self.tuning.delay_step).min(self.tuning.max_target_delay_ns as f64);
        self.stats.delay_raises += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempo_protocol::AudioFrame;

    struct RecordingDecoder {
        decoded: Vec<u32>,
        missing: u64,
    }

    impl RecordingDecoder {
        fn new() -> Self {
            RecordingDecoder {
                decoded: Vec::new(),
                missing: 0,
            }
        }
    }

    impl FrameDecoder<AudioFrame> for RecordingDecoder {
        fn decode(&mut self, frame: &AudioFrame) {
            self.decoded.push(frame.frame_index());
        }

        fn decode_missing(&mut self) {
            self.missing += 1;
        }
    }

    fn frame(index: u32) -> AudioFrame {
        AudioFrame::new(index, Bytes::from_static(b"pcm"), Bytes::from_static(b"pcm"))
    }

    fn deliver(store: &mut FrameStore<AudioFrame>, index: u32) {
        store.insert(index, frame(index));
        store.raise_frontier(index + 1);
        store.advance_next_frame_needed();
    }

    #[test]
    fn test_dormant_until_frontier_moves() {
        let store: FrameStore<AudioFrame> = FrameStore::new(8192);
        let mut cursor = Cursor::new(CursorTuning::default());
        let mut decoder = RecordingDecoder::new();

        cursor.tick(&store, 1_000_000_000, &mut decoder, &mut DiscreteNudge);
        assert!(!cursor.active());
        assert!(decoder.decoded.is_empty());
        assert_eq!(cursor.ok_to_pop(&store), 0);
    }

    #[test]
    fn test_steady_stream_decodes_in_order() {
        let mut store: FrameStore<AudioFrame> = FrameStore::new(8192);
        let mut cursor = Cursor::new(CursorTuning::default());
        let mut decoder = RecordingDecoder::new();
        let mut policy = DiscreteNudge;

        // one frame arrives per frame period, cursor ticking in lockstep
        for step in 0..500u32 {
            deliver(&mut store, step);
            cursor.tick(
                &store,
                u64::from(step) * FRAME_DURATION_NS,
                &mut decoder,
                &mut policy,
            );
        }

        assert!(cursor.active());
        assert_eq!(cursor.stats().resets, 0);
        assert_eq!(decoder.missing, 0);
        assert!(!decoder.decoded.is_empty());
        // strictly consecutive playout
        for pair in decoder.decoded.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
        assert!(cursor.stats().quality > 0.99);
    }

    #[test]
    fn test_starvation_forces_hard_reset_and_raises_delay() {
        let mut store: FrameStore<AudioFrame> = FrameStore::new(8192);
        let mut cursor = Cursor::new(CursorTuning::default());
        let mut decoder = RecordingDecoder::new();
        let mut policy = DiscreteNudge;

        let mut now = 0u64;
        for step in 0..100u32 {
            deliver(&mut store, step);
            now = u64::from(step) * FRAME_DURATION_NS;
            cursor.tick(&store, now, &mut decoder, &mut policy);
        }
        let delay_before = cursor.target_delay_ns();
        assert_eq!(cursor.stats().resets, 0);

        // the stream stops but time keeps passing
        for _ in 0..200u64 {
            now += FRAME_DURATION_NS;
            cursor.tick(&store, now, &mut decoder, &mut policy);
        }

        assert!(cursor.stats().resets >= 1);
        assert!(cursor.target_delay_ns() > delay_before);
        assert!(decoder.missing > 0);
    }

    #[test]
    fn test_margin_surplus_nudges_faster() {
        let mut store: FrameStore<AudioFrame> = FrameStore::new(8192);
        let mut cursor = Cursor::new(CursorTuning::default());
        let mut decoder = RecordingDecoder::new();
        let mut policy = DiscreteNudge;

        deliver(&mut store, 0);
        cursor.tick(&store, 0, &mut decoder, &mut policy); // anchors at frontier

        // a brief burst leaves a steady 20 ms surplus over the target: too
        // small for a hard reset, enough for the fast average to cross the
        // nudge band
        let mut next = 1u32;
        for step in 1..400u64 {
            deliver(&mut store, next);
            next += 1;
            if step <= 8 {
                deliver(&mut store, next);
                next += 1;
            }
            cursor.tick(&store, step * FRAME_DURATION_NS, &mut decoder, &mut policy);
            if cursor.stats().nudges_faster > 0 {
                assert_eq!(cursor.stats().resets, 0);
                return;
            }
        }
        panic!("margin surplus never produced a nudge");
    }

    #[test]
    fn test_ok_to_pop_trails_cursor_and_contiguity() {
        let mut store: FrameStore<AudioFrame> = FrameStore::new(8192);
        let mut cursor = Cursor::new(CursorTuning::default());
        let mut decoder = RecordingDecoder::new();
        let mut policy = DiscreteNudge;

        for step in 0..100u32 {
            deliver(&mut store, step);
            cursor.tick(
                &store,
                u64::from(step) * FRAME_DURATION_NS,
                &mut decoder,
                &mut policy,
            );
        }

        let safe = cursor.ok_to_pop(&store);
        assert!(safe > 0);
        assert!(safe <= store.contiguous_count());

        store.pop_through(safe).unwrap();
        assert_eq!(cursor.ok_to_pop(&store), 0);
    }

    #[test]
    fn test_missing_frames_degrade_quality() {
        let mut store: FrameStore<AudioFrame> = FrameStore::new(8192);
        let mut cursor = Cursor::new(CursorTuning::default());
        let mut decoder = RecordingDecoder::new();
        let mut policy = DiscreteNudge;

        // every third frame lost, frontier still advances
        for step in 0..300u32 {
            if step % 3 != 0 {
                store.insert(step, frame(step));
            }
            store.raise_frontier(step + 1);
            store.advance_next_frame_needed();
            cursor.tick(
                &store,
                u64::from(step) * FRAME_DURATION_NS,
                &mut decoder,
                &mut policy,
            );
        }

        assert!(decoder.missing > 0);
        assert!(cursor.stats().quality < 0.9);
    }
}
