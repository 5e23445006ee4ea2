//! One encrypted peer-to-peer connection
//!
//! A connection owns the outbound [`Sender`], the inbound [`Receiver`], and
//! the AEAD [`Session`] that seals packets between them. Each endpoint has a
//! single-byte node id; a packet is sealed with the sending node's id as
//! associated data and that same id is appended as the last wire byte, so a
//! server multiplexing many peers on one socket can pick the right session
//! before opening anything.

use crate::frame::MediaFrame;
use crate::packet::{Packet, ReceiverSection, MAX_PLAINTEXT_SIZE, PRIMING_SEQNO};
use crate::receiver::{Receiver, ReceiverStats};
use crate::sender::{Sender, SenderStats};
use std::collections::VecDeque;
use std::net::SocketAddr;
use tempo_crypto::Session;
use thiserror::Error;
use tracing::{debug, trace};

/// Acknowledgment silence after which the session is considered lost.
pub const SESSION_TIMEOUT_NS: u64 = 4_000_000_000;

/// Connection-level errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("no peer address known")]
    NoPeer,

    #[error("unreliable payload of {0} bytes cannot fit any packet")]
    UnreliableTooLarge(usize),
}

/// Counters for the packet-boundary failure modes. All of these are normal
/// operating conditions on an unreliable network.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub decryption_failures: u64,
    pub invalid_packets: u64,
    pub priming_packets: u64,
    pub rehomings: u64,
    pub sender: SenderStats,
    pub receiver: ReceiverStats,
}

/// A bidirectional frame transport to one peer.
pub struct Connection<F> {
    node_id: u8,
    peer_id: u8,

    sender: Sender<F>,
    receiver: Receiver<F>,
    session: Session,

    peer: Option<SocketAddr>,
    auto_rehome: bool,
    // highest "biggest seqno received" the peer has ever acknowledged
    biggest_ack_from_peer: Option<u32>,

    pending_unreliable: VecDeque<Vec<u8>>,
    inbound_unreliable: VecDeque<Vec<u8>>,

    packets_sent: u64,
    packets_received: u64,
    decryption_failures: u64,
    invalid_packets: u64,
    priming_packets: u64,
    rehomings: u64,
}

impl<F: MediaFrame> Connection<F> {
    /// `auto_rehome` connections follow the peer to whatever source address
    /// its freshest packets arrive from; fixed connections only ever talk to
    /// the address given at setup.
    pub fn new(
        session: Session,
        node_id: u8,
        peer_id: u8,
        peer: Option<SocketAddr>,
        auto_rehome: bool,
    ) -> Self {
        Connection {
            node_id,
            peer_id,
            sender: Sender::new(),
            receiver: Receiver::new(),
            session,
            peer,
            auto_rehome,
            biggest_ack_from_peer: None,
            pending_unreliable: VecDeque::new(),
            inbound_unreliable: VecDeque::new(),
            packets_sent: 0,
            packets_received: 0,
            decryption_failures: 0,
            invalid_packets: 0,
            priming_packets: 0,
            rehomings: 0,
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn sender(&mut self) -> &mut Sender<F> {
        &mut self.sender
    }

    pub fn receiver(&mut self) -> &mut Receiver<F> {
        &mut self.receiver
    }

    pub fn frames(&self) -> &crate::window::FrameStore<F> {
        self.receiver.frames()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            packets_sent: self.packets_sent,
            packets_received: self.packets_received,
            decryption_failures: self.decryption_failures,
            invalid_packets: self.invalid_packets,
            priming_packets: self.priming_packets,
            rehomings: self.rehomings,
            sender: self.sender.stats(),
            receiver: self.receiver.stats(),
        }
    }

    /// Queue a best-effort out-of-band payload. It rides the tail of the
    /// next packet with room for it, exactly once, with no retransmission.
    pub fn push_unreliable(&mut self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        if payload.len() > MAX_PLAINTEXT_SIZE / 2 {
            return Err(ConnectionError::UnreliableTooLarge(payload.len()));
        }
        self.pending_unreliable.push_back(payload);
        Ok(())
    }

    /// Take the next received out-of-band payload, if any.
    pub fn pop_unreliable(&mut self) -> Option<Vec<u8>> {
        self.inbound_unreliable.pop_front()
    }

    /// Assemble, seal, and address the next outgoing packet.
    ///
    /// Returns the wire datagram and the destination to send it to.
    pub fn send_packet(&mut self, now_ns: u64) -> Result<(Vec<u8>, SocketAddr), ConnectionError> {
        let peer = self.peer.ok_or(ConnectionError::NoPeer)?;

        let sender_section = self.sender.build_sender_section(now_ns);
        let receiver_section = self.receiver.build_receiver_section();

        let mut packet = Packet {
            sender_section,
            receiver_section,
            unreliable_data: None,
        };

        if let Some(payload) = self.pending_unreliable.front() {
            if packet.wire_size() + payload.len() <= MAX_PLAINTEXT_SIZE {
                packet.unreliable_data = self
                    .pending_unreliable
                    .pop_front()
                    .map(bytes::Bytes::from);
            }
        }

        let mut wire = self.session.seal(&[self.node_id], &packet.encode());
        wire.push(self.node_id);
        self.packets_sent += 1;

        Ok((wire, peer))
    }

    /// Ingest one wire datagram.
    ///
    /// Returns `true` if the packet authenticated and parsed. Failures are
    /// counted and swallowed; a hostile or corrupted datagram can never take
    /// the connection down.
    ///
    /// A priming packet touches no transport counters and carries no
    /// sections; its one side effect is to seed the peer address when none
    /// is known yet, so a listener that starts without a configured peer
    /// learns it from the first authenticated datagram.
    pub fn receive_packet(&mut self, wire: &[u8], source: SocketAddr, now_ns: u64) -> bool {
        let Some(body) = wire.strip_suffix(&[self.peer_id]) else {
            self.invalid_packets += 1;
            return false;
        };

        let Some(plaintext) = self.session.open(&[self.peer_id], body) else {
            self.decryption_failures += 1;
            return false;
        };

        let packet = match Packet::<F>::decode(bytes::Bytes::from(plaintext)) {
            Ok(packet) => packet,
            Err(err) => {
                trace!(%err, "undecodable packet");
                self.invalid_packets += 1;
                return false;
            }
        };
        self.packets_received += 1;

        // priming packets warm up NAT state and carry nothing else
        if packet.sender_section.sequence_number == PRIMING_SEQNO {
            self.priming_packets += 1;
            if self.peer.is_none() {
                self.peer = Some(source);
            }
            return true;
        }

        self.maybe_rehome(&packet.receiver_section, source);

        self.receiver
            .receive_sender_section(&packet.sender_section, now_ns);
        self.sender
            .receive_receiver_section(&packet.receiver_section, now_ns);

        if let Some(data) = packet.unreliable_data {
            self.inbound_unreliable.push_back(data.to_vec());
        }

        true
    }

    /// Follow the peer across address changes. The proof that the peer is
    /// now reachable at a packet's source address is its acknowledged
    /// progress: the "biggest sequence number received" in the ack list must
    /// set a new high-water mark. A packet whose acks show nothing new, no
    /// matter how fresh its own sequence number, never moves an established
    /// peer, so stragglers replayed along an abandoned path are harmless.
    fn maybe_rehome(&mut self, receiver_section: &ReceiverSection, source: SocketAddr) {
        if self.peer.is_none() {
            self.peer = Some(source);
        }

        let Some(biggest_ack) = receiver_section.packets_received.iter().max().copied() else {
            return;
        };
        let is_new_high_water = self
            .biggest_ack_from_peer
            .map_or(true, |biggest| biggest_ack > biggest);
        if !is_new_high_water {
            return;
        }
        self.biggest_ack_from_peer = Some(biggest_ack);

        if self.auto_rehome && self.peer != Some(source) {
            debug!(old = ?self.peer, new = %source, "peer rehomed");
            self.peer = Some(source);
            self.rehomings += 1;
        }
    }

    /// Pop consumed frames out of the inbound store. Playout calls this
    /// after rendering the contiguous prefix.
    pub fn pop_frames(&mut self, num: u32) -> Result<(), crate::window::StoreError> {
        self.receiver.pop_frames(num)
    }

    pub fn last_good_ack_ns(&self) -> Option<u64> {
        self.sender.stats().last_good_ack_ns
    }

    /// Whether acknowledgment progress has stalled long enough that the
    /// owning layer should drop the session and return to key exchange.
    /// A connection that has never seen a good ack is not yet stale.
    pub fn ack_is_stale(&self, now_ns: u64) -> bool {
        match self.last_good_ack_ns() {
            Some(last) => now_ns.saturating_sub(last) > SESSION_TIMEOUT_NS,
            None => false,
        }
    }
}

impl<F: MediaFrame> Connection<F> {
    /// Seal a priming packet: it carries no frames and no acks, exists only
    /// to punch and keep open NAT state toward the peer.
    pub fn make_priming_packet(&mut self, peer: SocketAddr) -> (Vec<u8>, SocketAddr) {
        let packet: Packet<F> = Packet {
            sender_section: crate::packet::SenderSection {
                sequence_number: PRIMING_SEQNO,
                frames: Vec::new(),
            },
            receiver_section: Default::default(),
            unreliable_data: None,
        };

        let mut wire = self.session.seal(&[self.node_id], &packet.encode());
        wire.push(self.node_id);
        (wire, peer)
    }
}
