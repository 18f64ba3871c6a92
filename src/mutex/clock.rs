//! Lamport logical clock and the request ordering key.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a participating process (its rank).
pub type ProcessId = u32;

/// Per-process Lamport clock.
///
/// The counter only ever moves forward: every `tick` and every `merge`
/// leaves it strictly greater than before. A step that would pass
/// `u64::MAX` returns `None` and leaves the counter unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogicalClock {
    counter: u64,
}

impl LogicalClock {
    /// Create a clock at zero.
    pub fn new() -> Self {
        LogicalClock { counter: 0 }
    }

    /// Advance for a local event. Returns the new value.
    #[inline]
    pub fn tick(&mut self) -> Option<u64> {
        self.counter = self.counter.checked_add(1)?;
        Some(self.counter)
    }

    /// Fold in a timestamp carried by a received message. Returns the new value.
    #[inline]
    pub fn merge(&mut self, remote: u64) -> Option<u64> {
        self.counter = self.counter.max(remote).checked_add(1)?;
        Some(self.counter)
    }

    /// Current counter value.
    #[inline]
    pub fn now(&self) -> u64 {
        self.counter
    }
}

/// Total order key of a CS request: `(timestamp, process)`.
///
/// Ordered lexicographically, timestamp first. Equal timestamps fall back to
/// the process id, so two distinct processes never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    /// Lamport timestamp stamped when the request was issued.
    pub timestamp: u64,
    /// Issuing process.
    pub process: ProcessId,
}

impl RequestKey {
    pub fn new(timestamp: u64, process: ProcessId) -> Self {
        RequestKey { timestamp, process }
    }

    /// True if this request wins priority over `other`.
    #[inline]
    pub fn precedes(&self, other: &RequestKey) -> bool {
        self < other
    }
}

impl Ord for RequestKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then(self.process.cmp(&other.process))
    }
}

impl PartialOrd for RequestKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.timestamp, self.process)
    }
}
