//! Binary wake-up event: one waiter, coalescing signals.

use parking_lot::{Condvar, Mutex};

/// A sticky "progress was made" event.
///
/// `signal` marks the event set; repeated signals before a `wait` collapse
/// into one. `wait` clears the flag and returns, blocking first if the flag
/// is not yet set. The mutex acquire/release on both sides orders the
/// signaler's preceding stores before the waiter's subsequent loads, so a
/// producer woken by the consumer also observes the consumer's head update.
///
/// Intended for a single waiter; any number of threads may signal.
pub struct Event {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create an unset event.
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Mark the event set and wake the waiter, if any.
    pub fn signal(&self) {
        let mut set = self.set.lock();
        *set = true;
        self.cond.notify_one();
    }

    /// Block until the event is set, then clear it and return.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.cond.wait(&mut set);
        }
        *set = false;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
