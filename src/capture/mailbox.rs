//! Single-slot "latest frame" mailbox shared with the delivery thread.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Holds the most recent value and whether it has been read yet.
///
/// The flag is only written while the slot lock is held, so a fresh flag
/// always has a value behind it. `is_fresh` reads it without locking.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    fresh: AtomicBool,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            fresh: AtomicBool::new(false),
        }
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored value and mark it fresh.
    pub fn post(&self, value: T) {
        let mut slot = self.slot.lock();
        *slot = Some(value);
        self.fresh.store(true, Ordering::Release);
    }

    /// Take the value if it has not been taken since the last post.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        self.fresh.store(false, Ordering::Release);
        slot.take()
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }
}
