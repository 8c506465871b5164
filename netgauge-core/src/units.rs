//! Rate arithmetic and display helpers

use std::time::Duration;

/// Megabits per second for `bytes` transferred over `elapsed`
pub fn mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (bytes as f64 * 8.0) / (secs * 1_000_000.0)
}

/// Human-readable rate, switching to Gbps at 1000 Mbps
pub fn format_speed(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else if mbps >= 100.0 {
        format!("{:.0} Mbps", mbps)
    } else if mbps >= 10.0 {
        format!("{:.1} Mbps", mbps)
    } else {
        format!("{:.2} Mbps", mbps)
    }
}

pub fn format_latency(ms: f64) -> String {
    if ms >= 100.0 {
        format!("{:.0} ms", ms)
    } else {
        format!("{:.1} ms", ms)
    }
}
