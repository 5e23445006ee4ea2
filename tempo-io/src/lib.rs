//! Tempo I/O and Platform Abstraction
//!
//! Non-blocking UDP plumbing and time conversions for the tempo transport.
//! The protocol and playout crates never touch sockets or ambient clocks
//! directly; everything time-shaped is injected from here.

pub mod socket;
pub mod time;

pub use socket::{MediaSocket, SocketError};
pub use time::{MonotonicClock, Pacer, ns_to_samples, samples_to_ns, SAMPLE_RATE};
