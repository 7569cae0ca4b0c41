//! Wall-clock helpers.
//!
//! Expiry times and access timestamps are absolute UNIX milliseconds so that
//! they survive being written to the append-only file and replayed later.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in milliseconds.
#[inline]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
