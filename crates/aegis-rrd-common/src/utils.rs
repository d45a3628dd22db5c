//! Aegis RRD Utils - Utility Functions
//!
//! Common helpers for the round-robin database: duration shorthand used to
//! describe layers and size formatting for log output.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

// =============================================================================
// Duration Shorthand
// =============================================================================

pub const SECONDS_PER_MINUTE: u64 = 60;
pub const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
pub const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;
pub const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;
pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

const DURATION_UNITS: &[(&str, u64)] = &[
    ("y", SECONDS_PER_YEAR),
    ("w", SECONDS_PER_WEEK),
    ("d", SECONDS_PER_DAY),
    ("h", SECONDS_PER_HOUR),
    ("m", SECONDS_PER_MINUTE),
    ("s", 1),
];

/// Parse a duration shorthand such as "15s", "1m", "3w" or "5y" into seconds.
///
/// A bare number is taken as seconds. Years are 365 days.
pub fn parse_duration(s: &str) -> Option<u64> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    let (num_str, unit) = DURATION_UNITS
        .iter()
        .find_map(|(suffix, secs)| s.strip_suffix(suffix).map(|n| (n, *secs)))
        .unwrap_or((s.as_str(), 1));

    num_str.trim().parse::<u64>().ok()?.checked_mul(unit)
}

/// Format seconds using the largest unit that divides them exactly.
pub fn format_duration(secs: u64) -> String {
    if secs == 0 {
        return "0s".to_string();
    }

    DURATION_UNITS
        .iter()
        .find(|(_, unit)| secs % unit == 0)
        .map(|(suffix, unit)| format!("{}{}", secs / unit, suffix))
        .unwrap_or_else(|| format!("{}s", secs))
}

// =============================================================================
// Size Formatting
// =============================================================================

/// Render a byte count for log lines, e.g. `1.74 MB` for the default layout.
pub fn format_size(bytes: u64) -> String {
    const SCALED: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut scaled = bytes as f64 / 1024.0;
    let mut unit = 0;
    while scaled >= 1024.0 && unit + 1 < SCALED.len() {
        scaled /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", scaled, SCALED[unit])
}

// =============================================================================
// Tests
// =============================================================================
