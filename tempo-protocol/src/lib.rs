//! Tempo Transport Core
//!
//! This crate implements the core of the tempo real-time media transport:
//! the frame abstraction, wire packet codec, sliding-window frame store,
//! redundant-retransmission sender, selective-acknowledgment receiver, and
//! the per-peer connection that ties them to an encrypted datagram channel.
//!
//! All state here is single-threaded by design: every method is meant to be
//! called from reactor callbacks on one logical thread, so there is no
//! internal locking. Timestamps are injected by the caller rather than read
//! from ambient clocks.

pub mod connection;
pub mod frame;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod window;

pub use connection::{Connection, ConnectionError, ConnectionStats, SESSION_TIMEOUT_NS};
pub use frame::{AudioFrame, MediaFrame, VideoFrame};
pub use packet::{
    Packet, PacketRecord, ReceiverSection, SenderSection, WireError, MAX_PLAINTEXT_SIZE,
    MAX_SACKS_PER_PACKET, PRIMING_SEQNO,
};
pub use receiver::{Receiver, ReceiverStats};
pub use sender::{Sender, SenderStats};
pub use window::{FrameStore, SlidingWindow, StoreError};
