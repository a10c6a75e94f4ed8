//! Wall-clock helpers. Timestamps on the wire are unix milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds; a clock before the epoch reads as 0.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
