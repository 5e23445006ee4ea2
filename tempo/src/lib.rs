//! Tempo - low-latency frame transport
//!
//! High-level API for moving encoded media frames between two endpoints
//! over lossy datagrams, with encryption, redundant retransmission, and an
//! adaptive playout schedule.

pub use tempo_crypto as crypto;
pub use tempo_io as io;
pub use tempo_playout as playout;
pub use tempo_protocol as protocol;

// Re-export commonly used types
pub use protocol::{AudioFrame, Connection, MediaFrame, Packet, VideoFrame};
pub use playout::{Clock, Cursor};
