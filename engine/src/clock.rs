//! Logical clock for ordering mutations and issuing version tokens.
//!
//! The clock is a monotonically increasing counter, not wall-clock time.
//! It is shared between concurrent writers, so ticking takes `&self`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A point on a [`LogicalClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalTimestamp(pub u64);

impl std::fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A monotonically increasing counter.
///
/// Every value handed out by [`tick`](Self::tick) is strictly greater than all
/// values handed out before it by the same clock.
#[derive(Debug, Default)]
pub struct LogicalClock {
    counter: AtomicU64,
}

impl LogicalClock {
    /// Create a new clock starting at 0. The first tick returns 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock with a specific counter value.
    pub fn with_counter(counter: u64) -> Self {
        Self {
            counter: AtomicU64::new(counter),
        }
    }

    /// Increment the clock and return the new value.
    pub fn tick(&self) -> LogicalTimestamp {
        LogicalTimestamp(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recent value handed out.
    pub fn current(&self) -> LogicalTimestamp {
        LogicalTimestamp(self.counter.load(Ordering::SeqCst))
    }
}
