//! Time source for the fund
//!
//! Every state change reads `now()` once and threads that instant through the
//! accumulator sync and the ledger mutation.

use crate::types::{Seconds, Timestamp};
use parking_lot::RwLock;

/// Source of the current unix time in seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and replayed operations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: RwLock<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, now: Timestamp) {
        *self.now.write() = now;
    }

    /// Move forward by `secs`
    pub fn advance(&self, secs: Seconds) {
        let mut now = self.now.write();
        *now = now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.read()
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}
