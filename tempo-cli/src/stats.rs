//! Statistics display and formatting

use tempo_playout::{ClockStats, CursorStats};
use tempo_protocol::ConnectionStats;

/// Format a nanosecond duration in human-readable form
pub fn format_duration_ns(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.2}s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{:.2}ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.2}µs", ns as f64 / 1e3)
    } else {
        format!("{}ns", ns)
    }
}

/// Format a count per total as a percentage
pub fn format_percent(part: u64, total: u64) -> String {
    if total == 0 {
        "0.0%".to_string()
    } else {
        format!("{:.1}%", 100.0 * part as f64 / total as f64)
    }
}

/// Format an events-per-second rate
pub fn format_rate(events: u64, elapsed_ns: u64) -> String {
    if elapsed_ns == 0 {
        "0.0/s".to_string()
    } else {
        format!("{:.1}/s", events as f64 * 1e9 / elapsed_ns as f64)
    }
}

/// Print a connection summary to stdout
pub fn display_connection_stats(label: &str, stats: &ConnectionStats) {
    println!("{label}:");
    println!(
        "  packets: {} sent, {} received ({} lost per sender, {} false positives)",
        stats.packets_sent,
        stats.packets_received,
        stats.sender.packet_losses_detected,
        stats.sender.packet_loss_false_positives,
    );
    println!(
        "  frames: {} delivered, {} redundant, {} dropped",
        stats.receiver.popped, stats.receiver.redundant, stats.receiver.dropped,
    );
    println!(
        "  acks: {} bad, smoothed rtt {}",
        stats.sender.bad_acks,
        format_duration_ns(stats.sender.smoothed_rtt_ns as u64),
    );
    println!(
        "  failures: {} decryption, {} invalid, {} rehomings",
        stats.decryption_failures, stats.invalid_packets, stats.rehomings,
    );
}

/// Print a playout summary to stdout
pub fn display_playout_stats(cursor: &CursorStats, clock: &ClockStats) {
    println!("playout:");
    println!(
        "  quality {:.1}% @ target delay {}, {} resets",
        100.0 * cursor.quality,
        format_duration_ns(cursor.target_delay_ns),
        cursor.resets,
    );
    println!(
        "  frames: {} decoded, {} concealed; nudges +{} -{}",
        cursor.frames_decoded, cursor.frames_missing, cursor.nudges_slower, cursor.nudges_faster,
    );
    println!(
        "  clock: {} resets, {} gaps, {} avulsions",
        clock.resets, clock.gaps, clock.avulsions,
    );
}
