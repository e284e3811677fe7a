//! Utility functions and helpers

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `level` accepts anything `EnvFilter` understands (a bare level or a
/// full directive string). An unparsable value falls back to `info` and
/// is reported once the subscriber is up, so the complaint is visible.
pub fn init_logging(level: &str, format: &str) {
    let (env_filter, bad_level) = match EnvFilter::try_new(level) {
        Ok(filter) => (filter, false),
        Err(_) => (EnvFilter::new("info"), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    if bad_level {
        tracing::warn!(
            "Unrecognized log level {:?}, falling back to \"info\"",
            level
        );
    }
}

/// Current time as an RFC 3339 UTC timestamp
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Duration until the next wall-clock hour boundary
pub fn until_next_hour() -> std::time::Duration {
    use chrono::{Timelike, Utc};

    let now = Utc::now();
    let seconds_into_hour = now.minute() as u64 * 60 + now.second() as u64;
    let remaining = 3600 - seconds_into_hour.min(3599);
    std::time::Duration::from_secs(remaining)
}

/// Format hashrate for display
pub fn format_hashrate(hashrate: f64) -> String {
    if hashrate >= 1_000_000_000.0 {
        format!("{:.2} GH/s", hashrate / 1_000_000_000.0)
    } else if hashrate >= 1_000_000.0 {
        format!("{:.2} MH/s", hashrate / 1_000_000.0)
    } else if hashrate >= 1_000.0 {
        format!("{:.2} KH/s", hashrate / 1_000.0)
    } else {
        format!("{:.0} H/s", hashrate)
    }
}
