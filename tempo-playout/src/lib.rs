//! Tempo Playout
//!
//! The receive side of the transport hands over a sliding window of frames;
//! this crate decides when to play them. The [`Clock`] models the peer's
//! sample clock against the local one with gradual rate slewing, and the
//! [`Cursor`] walks the frame store on a schedule that continuously trades
//! buffering delay against glitch rate.

pub mod clock;
pub mod cursor;
mod ewma;

pub use clock::{Clock, ClockConfig, ClockStats};
pub use cursor::{
    CorrectionPolicy, Cursor, CursorStats, CursorTuning, DiscreteNudge, FrameDecoder,
    FRAME_DURATION_NS, SAMPLE_PERIOD_NS,
};
