//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a duration to fractional milliseconds (for metrics)
pub fn duration_to_millis_f64(duration: std::time::Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}
