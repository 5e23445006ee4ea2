//! Inbound frame ingestion and acknowledgment construction
//!
//! The receiver files incoming frames into the sliding-window store,
//! advances the contiguous-delivery pointer, and remembers which frames
//! each recent packet carried so its acknowledgments can tell the sender
//! exactly which debts are already settled.

use crate::frame::MediaFrame;
use crate::packet::{PacketRecord, ReceiverSection, SenderSection, MAX_SACKS_PER_PACKET};
use crate::window::{FrameStore, StoreError};
use std::collections::VecDeque;

/// How many recent packet records are kept for selective acknowledgment.
pub const RECORD_WINDOW: usize = 512;

/// Receiver statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    /// Frames that arrived below the contiguous-delivery pointer.
    pub already_acked: u64,
    /// Frames that arrived at an already occupied slot.
    pub redundant: u64,
    /// Frames evicted unconsumed by forward window slides.
    pub dropped: u64,
    /// Frames released to the playout layer.
    pub popped: u64,
    pub last_new_frame_ns: Option<u64>,
}

/// The inbound half of a connection.
pub struct Receiver<F> {
    store: FrameStore<F>,
    biggest_seqno_received: Option<u32>,
    recent_packets: VecDeque<PacketRecord>,
    already_acked: u64,
    last_new_frame_ns: Option<u64>,
}

impl<F: MediaFrame> Default for Receiver<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: MediaFrame> Receiver<F> {
    pub fn new() -> Self {
        Receiver {
            store: FrameStore::new(crate::sender::FRAME_WINDOW),
            biggest_seqno_received: None,
            recent_packets: VecDeque::with_capacity(RECORD_WINDOW),
            already_acked: 0,
            last_new_frame_ns: None,
        }
    }

    pub fn frames(&self) -> &FrameStore<F> {
        &self.store
    }

    pub fn next_frame_needed(&self) -> u32 {
        self.store.next_frame_needed()
    }

    pub fn frontier(&self) -> u32 {
        self.store.frontier()
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            already_acked: self.already_acked,
            redundant: self.store.redundant(),
            dropped: self.store.dropped(),
            popped: self.store.popped(),
            last_new_frame_ns: self.last_new_frame_ns,
        }
    }

    /// Ingest the sender section of an incoming packet.
    pub fn receive_sender_section(&mut self, section: &SenderSection<F>, now_ns: u64) {
        self.biggest_seqno_received = Some(
            self.biggest_seqno_received
                .map_or(section.sequence_number, |b| b.max(section.sequence_number)),
        );

        for frame in &section.frames {
            let index = frame.frame_index();
            self.store.raise_frontier(index + 1);

            if index < self.store.next_frame_needed() {
                self.already_acked += 1;
                continue;
            }

            if self.store.insert(index, frame.clone()) == crate::window::InsertOutcome::Stored {
                self.last_new_frame_ns = Some(now_ns);
            }
        }

        self.store.advance_next_frame_needed();

        if !section.frames.is_empty() {
            if self.recent_packets.len() >= RECORD_WINDOW {
                self.recent_packets.pop_front();
            }
            self.recent_packets.push_back(section.to_record());
        }
    }

    /// Build the receiver section for the next outgoing packet.
    ///
    /// The highest sequence number seen goes first (the implicit cumulative
    /// ack); then recent packets are scanned newest to oldest, and any that
    /// acknowledge a frame the sender doesn't otherwise know was delivered
    /// are added until the list is full.
    ///
    /// # Panics
    /// Panics if a recorded packet claims to have carried the frame at
    /// `next_frame_needed`: that frame was received, so the pointer should
    /// have advanced past it. This indicates corrupted local bookkeeping,
    /// never a network condition.
    pub fn build_receiver_section(&self) -> ReceiverSection {
        let mut section = ReceiverSection {
            next_frame_needed: self.store.next_frame_needed(),
            packets_received: Vec::new(),
        };

        let Some(biggest) = self.biggest_seqno_received else {
            return section;
        };
        section.packets_received.push(biggest);

        for record in self.recent_packets.iter().rev() {
            if record.sequence_number == biggest {
                continue;
            }

            // does the packet acknowledge a frame that isn't otherwise acknowledged?
            let mut sack_the_packet = false;
            for &frame_index in &record.frames {
                assert!(
                    frame_index != section.next_frame_needed,
                    "frame {} recorded as received but still needed",
                    frame_index
                );
                if frame_index > section.next_frame_needed {
                    sack_the_packet = true;
                    break;
                }
            }

            if sack_the_packet {
                section.packets_received.push(record.sequence_number);
                if section.packets_received.len() >= MAX_SACKS_PER_PACKET {
                    break;
                }
            }
        }

        section
    }

    /// Release the oldest `num` frames after playout has consumed them.
    pub fn pop_frames(&mut self, num: u32) -> Result<(), StoreError> {
        self.store.pop_through(num)
    }
}
