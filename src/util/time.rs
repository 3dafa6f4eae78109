//! Wall-clock helpers
//!
//! Everything below the engine edge takes `now` as an explicit parameter;
//! this module is the only place that reads the system clock.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}

/// Whether an optional deadline has passed at `now`
#[inline]
pub fn is_past(deadline: Option<Timestamp>, now: Timestamp) -> bool {
    matches!(deadline, Some(d) if now >= d)
}
