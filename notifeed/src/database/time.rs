//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Issues strictly increasing millisecond timestamps.
///
/// Wall-clock time can repeat (two writes inside one millisecond) or step
/// backwards (NTP adjustment). Feed ordering uses `created_at` as its sort key, so
/// every record written through one clock gets a value greater than the last.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp: `max(now, last + 1)`.
    pub fn next_ms(&self) -> i64 {
        self.next_after(now_ms())
    }

    fn next_after(&self, wall_ms: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall_ms.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}
