//! Idle deadline shared by a relay tunnel and its watchers
//!
//! The deadline is a plain value rather than a one-shot timer: a watcher
//! that wakes up re-reads it, so a reset that lands while the watcher is
//! waking simply pushes eviction back instead of racing it.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) struct IdleDeadline {
    deadline: Mutex<Instant>,
}

impl IdleDeadline {
    pub(crate) fn new() -> Self {
        Self {
            deadline: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn reset(&self, timeout: Duration) {
        *self.deadline.lock() = Instant::now() + timeout;
    }

    pub(crate) fn deadline(&self) -> Instant {
        *self.deadline.lock()
    }

    pub(crate) fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline()
    }
}
