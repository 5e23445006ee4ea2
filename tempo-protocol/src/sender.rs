//! Outbound frame scheduling
//!
//! The sender keeps a sliding window of recent frames and their
//! acknowledgment state, and assembles packets without waiting for
//! acknowledgment round-trips: every packet carries the newest frame plus a
//! best-effort fill of the oldest frames still owed to the peer. A frame is
//! retransmission-eligible whenever it is outstanding but not currently
//! riding in an unacknowledged packet.

use crate::frame::MediaFrame;
use crate::packet::{PacketRecord, ReceiverSection, SenderSection, MAX_PLAINTEXT_SIZE};
use crate::window::SlidingWindow;
use tracing::{trace, warn};

/// Outbound frame window: 8192 frames ≈ 20 seconds of audio.
pub const FRAME_WINDOW: usize = 8192;

/// How many recently sent packets are remembered for ack matching.
pub const PACKET_WINDOW: usize = 1024;

/// Packets more than this far behind the newest selective ack are assumed
/// lost, releasing their frames for retransmission.
pub const REORDER_WINDOW: u32 = 32;

/// Bytes of each packet reserved for the receiver section.
const SENDER_SECTION_BUDGET: usize = MAX_PLAINTEXT_SIZE - 144;

const RTT_ALPHA: f64 = 0.125;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameStatus {
    outstanding: bool,
    in_flight: bool,
}

impl FrameStatus {
    fn needs_send(self) -> bool {
        self.outstanding && !self.in_flight
    }
}

struct OutboundFrame<F> {
    frame: F,
    status: FrameStatus,
}

struct SentPacket {
    record: PacketRecord,
    acked: bool,
    assumed_lost: bool,
    sent_at_ns: u64,
}

/// Sender statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    pub frames_dropped: u64,
    pub empty_packets: u64,
    pub bad_acks: u64,
    pub packet_transmissions: u64,
    pub packet_losses_detected: u64,
    pub packet_loss_false_positives: u64,
    pub frames_departed_by_expiration: u64,
    pub invalid_timestamps: u64,
    pub smoothed_rtt_ns: f64,
    /// Set whenever a receiver section advances the cumulative ack; the
    /// owning layer drops the session if this goes stale.
    pub last_good_ack_ns: Option<u64>,
}

/// The outbound half of a connection.
pub struct Sender<F> {
    frames: SlidingWindow<OutboundFrame<F>>,
    next_frame_index: u32,

    packets_in_flight: SlidingWindow<SentPacket>,
    next_sequence_number: u32,
    greatest_sack: Option<u32>,

    stats: SenderStats,
}

impl<F: MediaFrame> Default for Sender<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: MediaFrame> Sender<F> {
    pub fn new() -> Self {
        Sender {
            frames: SlidingWindow::new(FRAME_WINDOW),
            next_frame_index: 0,
            packets_in_flight: SlidingWindow::new(PACKET_WINDOW),
            next_sequence_number: 0,
            greatest_sack: None,
            stats: SenderStats::default(),
        }
    }

    pub fn next_frame_index(&self) -> u32 {
        self.next_frame_index
    }

    pub fn next_sequence_number(&self) -> u32 {
        self.next_sequence_number
    }

    pub fn stats(&self) -> SenderStats {
        self.stats.clone()
    }

    /// Number of frames still owed to the peer, and how many of those are
    /// currently riding in an unacknowledged packet.
    pub fn outstanding_counts(&self) -> (u32, u32) {
        let mut outstanding = 0;
        let mut in_flight = 0;
        for index in self.frames.range_begin()..self.next_frame_index {
            if let Some(entry) = self.frames.get(index) {
                if entry.status.outstanding {
                    outstanding += 1;
                    if entry.status.in_flight {
                        in_flight += 1;
                    }
                }
            }
        }
        (outstanding, in_flight)
    }

    /// Append a freshly encoded frame to the outbound window.
    ///
    /// If the window is full the oldest frame is evicted and counted as
    /// dropped; it will never be retransmitted.
    ///
    /// # Panics
    /// Panics if the frame's index does not continue the outbound sequence.
    pub fn push_frame(&mut self, frame: F) {
        assert_eq!(
            frame.frame_index(),
            self.next_frame_index,
            "encoder/sender frame index mismatch"
        );

        if self.next_frame_index >= self.frames.range_end() {
            let num_to_drop = self.next_frame_index - self.frames.range_end() + 1;
            self.frames.pop(num_to_drop);
            self.stats.frames_dropped += u64::from(num_to_drop);
            warn!(dropped = num_to_drop, "outbound frame window overflowed");
        }

        self.frames.set(
            self.next_frame_index,
            OutboundFrame {
                frame,
                status: FrameStatus {
                    outstanding: true,
                    in_flight: false,
                },
            },
        );
        self.next_frame_index += 1;
    }

    /// Assemble the sender section of the next outgoing packet.
    ///
    /// The newest frame is always included if it still needs sending; the
    /// remaining bundle slots are filled with the oldest frames that are
    /// outstanding but not in flight. Every included frame is marked in
    /// flight and recorded against the packet's sequence number.
    pub fn build_sender_section(&mut self, now_ns: u64) -> SenderSection<F> {
        let sequence_number = self.next_sequence_number;
        self.next_sequence_number += 1;

        let mut frames: Vec<F> = Vec::new();
        let mut wire_size = 0usize;

        if self.frames.range_begin() == self.next_frame_index {
            self.stats.empty_packets += 1;
        } else {
            let newest = self.next_frame_index - 1;
            if let Some(entry) = self.frames.get_mut(newest) {
                if entry.status.needs_send() {
                    wire_size += entry.frame.wire_size();
                    frames.push(entry.frame.clone());
                    entry.status.in_flight = true;
                }
            }

            for index in self.frames.range_begin()..self.next_frame_index {
                if frames.len() >= F::MAX_FRAMES_PER_PACKET {
                    break;
                }
                if let Some(entry) = self.frames.get_mut(index) {
                    if entry.status.needs_send() {
                        if wire_size + entry.frame.wire_size() > SENDER_SECTION_BUDGET {
                            break;
                        }
                        wire_size += entry.frame.wire_size();
                        frames.push(entry.frame.clone());
                        entry.status.in_flight = true;
                    }
                }
            }
        }

        let section = SenderSection {
            sequence_number,
            frames,
        };

        // recycle packet-record slots, assuming their frames departed
        if sequence_number >= self.packets_in_flight.range_end() {
            let num_to_drop = sequence_number - self.packets_in_flight.range_end() + 1;
            let mut departed = Vec::new();
            for seqno in
                self.packets_in_flight.range_begin()..self.packets_in_flight.range_begin() + num_to_drop
            {
                if let Some(sent) = self.packets_in_flight.get(seqno) {
                    if !sent.acked && !sent.assumed_lost {
                        departed.push(sent.record.clone());
                    }
                }
            }
            self.packets_in_flight.pop(num_to_drop);
            for record in departed {
                self.release_frames_of(&record, false);
            }
        }

        self.packets_in_flight.set(
            sequence_number,
            SentPacket {
                record: section.to_record(),
                acked: false,
                assumed_lost: false,
                sent_at_ns: now_ns,
            },
        );
        self.stats.packet_transmissions += 1;

        section
    }

    /// Mark the frames a departed packet carried as no longer in flight, so
    /// they become eligible for retransmission again.
    fn release_frames_of(&mut self, record: &PacketRecord, is_loss: bool) {
        let mut frame_departed = false;
        for &frame_index in &record.frames {
            // frame might have been dropped or delivered already
            if self.frames.contains(frame_index) {
                if let Some(entry) = self.frames.get_mut(frame_index) {
                    if entry.status.outstanding && entry.status.in_flight {
                        entry.status.in_flight = false;
                        frame_departed = true;
                    }
                }
            }
        }

        if frame_departed {
            if is_loss {
                self.stats.packet_losses_detected += 1;
            } else {
                self.stats.frames_departed_by_expiration += 1;
            }
        }
    }

    /// Process the receiver section of an incoming packet: release
    /// cumulatively acknowledged frames, mark selectively acknowledged
    /// packets, and adjudicate losses behind the reorder window.
    pub fn receive_receiver_section(&mut self, section: &ReceiverSection, now_ns: u64) {
        if section.next_frame_needed >= self.frames.range_end() {
            self.stats.bad_acks += 1;
            return;
        }

        if section.next_frame_needed > self.frames.range_begin() {
            let num_to_pop = section.next_frame_needed - self.frames.range_begin();
            self.frames.pop(num_to_pop);
        }

        let mut greatest_new_sack: Option<u32> = None;

        for &sack in &section.packets_received {
            if sack >= self.next_sequence_number {
                self.stats.bad_acks += 1;
                return;
            }

            greatest_new_sack = Some(greatest_new_sack.map_or(sack, |g| g.max(sack)));

            if sack < self.packets_in_flight.range_begin() {
                continue; // too old to matter
            }

            let Some(sent) = self.packets_in_flight.get_mut(sack) else {
                self.stats.bad_acks += 1;
                continue;
            };
            assert_eq!(
                sent.record.sequence_number, sack,
                "sender packet-record bookkeeping error"
            );

            if sent.acked {
                continue;
            }

            if sent.assumed_lost {
                self.stats.packet_loss_false_positives += 1;
            }
            sent.acked = true;

            match now_ns.checked_sub(sent.sent_at_ns) {
                Some(rtt) if rtt > 0 => {
                    if self.stats.smoothed_rtt_ns == 0.0 {
                        self.stats.smoothed_rtt_ns = rtt as f64;
                    } else {
                        self.stats.smoothed_rtt_ns =
                            RTT_ALPHA * rtt as f64 + (1.0 - RTT_ALPHA) * self.stats.smoothed_rtt_ns;
                    }
                }
                _ => self.stats.invalid_timestamps += 1,
            }

            let record = sent.record.clone();
            for frame_index in record.frames {
                assert!(
                    frame_index < self.frames.range_end(),
                    "acked frame beyond outbound window"
                );
                if self.frames.contains(frame_index) {
                    if let Some(entry) = self.frames.get_mut(frame_index) {
                        entry.status = FrameStatus::default();
                    }
                }
            }
        }

        // adjudicate losses only when the newest sack advances
        let Some(greatest_new_sack) = greatest_new_sack else {
            return;
        };
        if let Some(greatest) = self.greatest_sack {
            if greatest_new_sack <= greatest {
                return;
            }
        }

        let start = self.departure_adjudicated_until();
        let end = if greatest_new_sack > REORDER_WINDOW {
            (greatest_new_sack - REORDER_WINDOW).max(self.packets_in_flight.range_begin())
        } else {
            self.packets_in_flight.range_begin()
        };

        for seqno in start..end {
            let lost_record = match self.packets_in_flight.get_mut(seqno) {
                Some(sent) if !sent.acked && !sent.assumed_lost => {
                    sent.assumed_lost = true;
                    Some(sent.record.clone())
                }
                _ => None,
            };
            if let Some(record) = lost_record {
                trace!(seqno, "packet assumed lost");
                self.release_frames_of(&record, true);
            }
        }

        self.greatest_sack = Some(greatest_new_sack);
        self.stats.last_good_ack_ns = Some(now_ns);
    }

    fn departure_adjudicated_until(&self) -> u32 {
        match self.greatest_sack {
            Some(greatest) if greatest > REORDER_WINDOW => {
                (greatest - REORDER_WINDOW).max(self.packets_in_flight.range_begin())
            }
            _ => self.packets_in_flight.range_begin(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AudioFrame;
    use bytes::Bytes;

    fn frame(index: u32) -> AudioFrame {
        AudioFrame::new(index, Bytes::from_static(b"pcm"), Bytes::from_static(b"pcm"))
    }

    fn sack(next_frame_needed: u32, seqnos: &[u32]) -> ReceiverSection {
        ReceiverSection {
            next_frame_needed,
            packets_received: seqnos.to_vec(),
        }
    }

    #[test]
    fn test_newest_frame_always_sent_first() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        for i in 0..3 {
            sender.push_frame(frame(i));
        }

        let section = sender.build_sender_section(0);
        let indices: Vec<u32> = section.frames.iter().map(|f| f.frame_index()).collect();
        assert_eq!(indices[0], 2); // newest first
        assert_eq!(&indices[1..], &[0, 1]); // then oldest debts
    }

    #[test]
    fn test_no_resend_while_in_flight() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        sender.push_frame(frame(0));

        let first = sender.build_sender_section(0);
        assert_eq!(first.frames.len(), 1);

        // still in flight, nothing eligible
        let second = sender.build_sender_section(0);
        assert!(second.frames.is_empty());
    }

    #[test]
    fn test_ack_clears_outstanding() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        sender.push_frame(frame(0));
        let section = sender.build_sender_section(1_000);

        sender.receive_receiver_section(&sack(1, &[section.sequence_number]), 2_000);

        let (outstanding, in_flight) = sender.outstanding_counts();
        assert_eq!(outstanding, 0);
        assert_eq!(in_flight, 0);
        assert_eq!(sender.stats().last_good_ack_ns, Some(2_000));
        assert!(sender.stats().smoothed_rtt_ns > 0.0);
    }

    #[test]
    fn test_reorder_window_loss_requeues_frames() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        sender.push_frame(frame(0));

        // packet 0 carries frame 0 and is then lost
        let lost = sender.build_sender_section(0);
        assert_eq!(lost.frames.len(), 1);

        // enough later packets (all empty) to push packet 0 out of the
        // reorder window once the newest one is acked
        let mut last_seqno = lost.sequence_number;
        for _ in 0..=REORDER_WINDOW {
            last_seqno = sender.build_sender_section(0).sequence_number;
        }

        sender.receive_receiver_section(&sack(0, &[last_seqno]), 1);
        assert_eq!(sender.stats().packet_losses_detected, 1);

        // frame 0 is eligible again
        let resend = sender.build_sender_section(2);
        assert_eq!(resend.frames.len(), 1);
        assert_eq!(resend.frames[0].frame_index(), 0);
    }

    #[test]
    fn test_record_recycling_releases_frames() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        sender.push_frame(frame(0));
        sender.build_sender_section(0);

        // exhaust the packet window without any acks; the build that
        // recycles packet 0's record releases its frame afterwards
        for _ in 0..PACKET_WINDOW as u32 {
            sender.build_sender_section(0);
        }
        assert_eq!(sender.stats().frames_departed_by_expiration, 1);

        let section = sender.build_sender_section(0);
        assert_eq!(section.frames.len(), 1);
        assert_eq!(section.frames[0].frame_index(), 0);
    }

    #[test]
    fn test_bad_ack_ignored() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        sender.push_frame(frame(0));
        sender.build_sender_section(0);

        // acks a sequence number that was never sent
        sender.receive_receiver_section(&sack(0, &[999]), 1);
        assert_eq!(sender.stats().bad_acks, 1);

        let (outstanding, _) = sender.outstanding_counts();
        assert_eq!(outstanding, 1);
    }

    #[test]
    fn test_window_overflow_drops_oldest() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        for i in 0..FRAME_WINDOW as u32 + 5 {
            sender.push_frame(frame(i));
        }
        assert_eq!(sender.stats().frames_dropped, 5);
    }

    #[test]
    fn test_false_positive_counted() {
        let mut sender: Sender<AudioFrame> = Sender::new();
        sender.push_frame(frame(0));
        let lost = sender.build_sender_section(0);

        let mut last_seqno = lost.sequence_number;
        for _ in 0..=REORDER_WINDOW {
            last_seqno = sender.build_sender_section(0).sequence_number;
        }
        sender.receive_receiver_section(&sack(0, &[last_seqno]), 1);
        assert_eq!(sender.stats().packet_losses_detected, 1);

        // the "lost" packet's ack finally shows up
        sender.receive_receiver_section(&sack(0, &[lost.sequence_number, last_seqno]), 2);
        assert_eq!(sender.stats().packet_loss_false_positives, 1);
    }
}
