//! Wall-clock window bucketing.
//!
//! Windows are fixed-granularity truncations of UTC time. Rollover is plain
//! key inequality: if the loop stalls across several windows, the stale
//! buffer is still flushed exactly once at the next comparison, and an empty
//! window is simply never written.

use chrono::{DateTime, Utc};
use std::fmt;

/// Key of one wall-clock window. Totally ordered by time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    start: DateTime<Utc>,
    granularity_secs: u32,
}

impl WindowKey {
    /// Start of the window (inclusive).
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }
}

impl fmt::Display for WindowKey {
    /// Sortable key, e.g. `20251103_2134` for minute-aligned granularities
    /// (seconds are appended otherwise).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.granularity_secs % 60 == 0 {
            write!(f, "{}", self.start.format("%Y%m%d_%H%M"))
        } else {
            write!(f, "{}", self.start.format("%Y%m%d_%H%M%S"))
        }
    }
}

/// Maps instants to window keys and detects rollover.
#[derive(Debug, Clone, Copy)]
pub struct WindowTracker {
    granularity_secs: u32,
}

impl WindowTracker {
    pub fn new(granularity_secs: u32) -> Self {
        Self {
            granularity_secs: granularity_secs.max(1),
        }
    }

    /// Truncate an instant to its window.
    pub fn key_for(&self, instant: DateTime<Utc>) -> WindowKey {
        let granularity = i64::from(self.granularity_secs);
        let start_secs = instant.timestamp().div_euclid(granularity) * granularity;
        let start = DateTime::from_timestamp(start_secs, 0).unwrap_or(instant);

        WindowKey {
            start,
            granularity_secs: self.granularity_secs,
        }
    }

    /// Whether the window has changed since `previous`.
    pub fn rolled_over(&self, previous: &WindowKey, current: &WindowKey) -> bool {
        previous != current
    }
}
