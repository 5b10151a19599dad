//! Mutual-exclusion locks, built on top of [`Semaphore`].

use crate::scheduler;
use crate::semaphore::Semaphore;
use crate::thread::ThreadId;
use std::sync::Mutex;

/// A non-reentrant mutual-exclusion lock.
///
/// Tracks its owner so `Release` can assert that only the holder ever
/// releases it, matching the original design's `isHeldByCurrentThread`
/// check.
pub struct Lock {
    name: String,
    semaphore: Semaphore,
    owner: Mutex<Option<ThreadId>>,
}

impl Lock {
    /// Creates an unheld lock.
    pub fn new(name: impl Into<String>) -> Lock {
        let name = name.into();
        Lock {
            semaphore: Semaphore::new(format!("{name}-sem"), 1),
            name,
            owner: Mutex::new(None),
        }
    }

    /// The lock's name, for debugging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the lock, blocking until it is free.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this lock.
    pub fn acquire(&self) {
        assert!(
            !self.is_held_by_current_thread(),
            "lock {} acquired twice by the same thread",
            self.name
        );
        self.semaphore.p();
        *self.owner.lock().unwrap() = Some(scheduler::current_tid());
    }

    /// Releases the lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold this lock.
    pub fn release(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "lock {} released by a thread that does not hold it",
            self.name
        );
        *self.owner.lock().unwrap() = None;
        self.semaphore.v();
    }

    /// Whether the calling thread currently holds this lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock().unwrap() == Some(scheduler::current_tid())
    }
}
