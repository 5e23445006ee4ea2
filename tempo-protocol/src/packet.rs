//! Wire packet format
//!
//! Every datagram carries one packet: a sender section (sequence number and
//! a bundle of frames), a receiver section (cumulative progress plus
//! selective acknowledgments), and an optional unreliable tail blob. All
//! integers are big-endian and fixed-width; element counts are one byte.

use crate::frame::MediaFrame;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Maximum plaintext size of one packet; the sealed form stays inside a
/// conservative UDP MTU budget.
pub const MAX_PLAINTEXT_SIZE: usize = 1456;

/// Maximum number of selectively acknowledged sequence numbers per packet.
pub const MAX_SACKS_PER_PACKET: usize = 32;

/// Reserved sequence number for route-priming packets. A priming packet is
/// accepted (it warms up NAT state and can trigger rehoming) but its
/// sections are not processed and no counters move.
pub const PRIMING_SEQNO: u32 = u32::MAX;

/// Wire codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("packet truncated")]
    Truncated,

    #[error("element count exceeds capacity")]
    TooManyElements,

    #[error("frame payload exceeds maximum length")]
    FrameTooLong,
}

/// What a previously sent or received packet carried: its sequence number
/// and the indices of the frames bundled into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub sequence_number: u32,
    pub frames: Vec<u32>,
}

/// Sender half of a packet: newest frame plus retransmission fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderSection<F> {
    pub sequence_number: u32,
    pub frames: Vec<F>,
}

impl<F: MediaFrame> SenderSection<F> {
    pub fn to_record(&self) -> PacketRecord {
        PacketRecord {
            sequence_number: self.sequence_number,
            frames: self.frames.iter().map(|f| f.frame_index()).collect(),
        }
    }

    pub fn wire_size(&self) -> usize {
        4 + 1 + self.frames.iter().map(|f| f.wire_size()).sum::<usize>()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.frames.len() <= F::MAX_FRAMES_PER_PACKET);
        buf.put_u32(self.sequence_number);
        buf.put_u8(self.frames.len() as u8);
        for frame in &self.frames {
            frame.encode(buf);
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 5 {
            return Err(WireError::Truncated);
        }
        let sequence_number = buf.get_u32();
        let num_frames = buf.get_u8() as usize;
        if num_frames > F::MAX_FRAMES_PER_PACKET {
            return Err(WireError::TooManyElements);
        }

        let mut frames = Vec::with_capacity(num_frames);
        for _ in 0..num_frames {
            frames.push(F::decode(buf)?);
        }

        Ok(SenderSection {
            sequence_number,
            frames,
        })
    }
}

/// Receiver half of a packet: cumulative progress plus selective acks.
///
/// The first entry of `packets_received` is always the highest sequence
/// number seen (the implicit cumulative ack).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiverSection {
    pub next_frame_needed: u32,
    pub packets_received: Vec<u32>,
}

impl ReceiverSection {
    pub fn wire_size(&self) -> usize {
        4 + 1 + 4 * self.packets_received.len()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        debug_assert!(self.packets_received.len() <= MAX_SACKS_PER_PACKET);
        buf.put_u32(self.next_frame_needed);
        buf.put_u8(self.packets_received.len() as u8);
        for seqno in &self.packets_received {
            buf.put_u32(*seqno);
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.remaining() < 5 {
            return Err(WireError::Truncated);
        }
        let next_frame_needed = buf.get_u32();
        let num_sacks = buf.get_u8() as usize;
        if num_sacks > MAX_SACKS_PER_PACKET {
            return Err(WireError::TooManyElements);
        }
        if buf.remaining() < 4 * num_sacks {
            return Err(WireError::Truncated);
        }

        let mut packets_received = Vec::with_capacity(num_sacks);
        for _ in 0..num_sacks {
            packets_received.push(buf.get_u32());
        }

        Ok(ReceiverSection {
            next_frame_needed,
            packets_received,
        })
    }
}

/// One full packet as sealed onto the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet<F> {
    pub sender_section: SenderSection<F>,
    pub receiver_section: ReceiverSection,
    /// Optional out-of-band blob delivered best-effort, no retransmission.
    pub unreliable_data: Option<Bytes>,
}

impl<F: MediaFrame> Packet<F> {
    pub fn wire_size(&self) -> usize {
        self.sender_section.wire_size()
            + self.receiver_section.wire_size()
            + self.unreliable_data.as_ref().map_or(0, |d| d.len())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_size());
        self.sender_section.encode(&mut buf);
        self.receiver_section.encode(&mut buf);
        if let Some(data) = &self.unreliable_data {
            buf.put_slice(data);
        }
        buf.freeze()
    }

    /// Parse a packet; any trailing bytes become the unreliable blob.
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        let sender_section = SenderSection::decode(&mut buf)?;
        let receiver_section = ReceiverSection::decode(&mut buf)?;
        let unreliable_data = if buf.has_remaining() {
            Some(buf)
        } else {
            None
        };

        Ok(Packet {
            sender_section,
            receiver_section,
            unreliable_data,
        })
    }
}
