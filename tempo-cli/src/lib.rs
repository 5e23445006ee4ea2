//! Tempo CLI Library
//!
//! Shared functionality for the tempo command-line tools.

pub mod config;
pub mod stats;

pub use config::{Config, ConfigError, SimulateConfig};
pub use stats::{format_duration_ns, format_percent, format_rate};
