//! Condition variables, built from per-waiter semaphores.
//!
//! Mirrors the original design exactly: each call to [`Condition::wait`]
//! creates a private, single-use semaphore and appends it to the
//! condition's wait queue; [`Condition::signal`] wakes the oldest one.
//! There is no internal counter of "how many are waiting" beyond the
//! queue's length, and no spurious wakeups are possible.

use crate::lock::Lock;
use crate::semaphore::Semaphore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A condition variable associated with (but not bound at construction
/// time to) a particular [`Lock`].
pub struct Condition {
    name: String,
    waiting: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl Condition {
    /// Creates a condition variable with no waiters.
    pub fn new(name: impl Into<String>) -> Condition {
        Condition {
            name: name.into(),
            waiting: Mutex::new(VecDeque::new()),
        }
    }

    /// The condition's name, for debugging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Atomically releases `lock` and blocks the calling thread until
    /// woken by [`signal`](Condition::signal) or
    /// [`broadcast`](Condition::broadcast), then reacquires `lock` before
    /// returning.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold `lock`.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_current_thread(),
            "condition {} waited on without holding its lock",
            self.name
        );

        let waiter = Arc::new(Semaphore::new(format!("{}-waiter", self.name), 0));
        self.waiting.lock().unwrap().push_back(waiter.clone());
        lock.release();
        waiter.p();
        lock.acquire();
    }

    /// Wakes the longest-waiting thread blocked in [`wait`](Condition::wait),
    /// if any. A no-op if nobody is waiting.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold `lock`.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_current_thread(),
            "condition {} signaled without holding its lock",
            self.name
        );
        if let Some(waiter) = self.waiting.lock().unwrap().pop_front() {
            waiter.v();
        }
    }

    /// Wakes every thread currently blocked in [`wait`](Condition::wait).
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold `lock`.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_current_thread(),
            "condition {} broadcast without holding its lock",
            self.name
        );
        let mut waiting = self.waiting.lock().unwrap();
        while let Some(waiter) = waiting.pop_front() {
            waiter.v();
        }
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        // A Condition going out of scope with waiters queued would leave
        // those threads parked forever; nothing in this design unparks
        // them, so surface the bug loudly instead of leaking it silently.
        let remaining = self.waiting.lock().unwrap().len();
        if remaining > 0 {
            log::warn!(
                "condition {} dropped with {} thread(s) still waiting",
                self.name,
                remaining
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{interrupt, scheduler};
    use std::sync::Mutex as StdMutex;

    #[test]
    fn signal_wakes_a_single_waiter() {
        let lock = Arc::new(Lock::new("cv-lock"));
        let cond = Arc::new(Condition::new("cv"));
        let ready = Arc::new(StdMutex::new(false));
        let woke = Arc::new(StdMutex::new(false));

        let l1 = lock.clone();
        let c1 = cond.clone();
        let r1 = ready.clone();
        let w1 = woke.clone();
        let l2 = lock.clone();
        let c2 = cond.clone();
        let r2 = ready.clone();

        interrupt::without_interrupts(|| {
            scheduler::spawn("waiter", crate::thread::LOWEST_PRIORITY, -1, move || {
                l1.acquire();
                while !*r1.lock().unwrap() {
                    c1.wait(&l1);
                }
                *w1.lock().unwrap() = true;
                l1.release();
            })
            .unwrap();
            scheduler::spawn("signaler", crate::thread::LOWEST_PRIORITY, -1, move || {
                l2.acquire();
                *r2.lock().unwrap() = true;
                c2.signal(&l2);
                l2.release();
            })
            .unwrap();
        });

        scheduler::start();
        assert!(*woke.lock().unwrap());
    }

    #[test]
    fn broadcast_wakes_every_waiter() {
        let lock = Arc::new(Lock::new("cv-lock-b"));
        let cond = Arc::new(Condition::new("cv-b"));
        let ready = Arc::new(StdMutex::new(false));
        let woke_count = Arc::new(std::sync::atomic::AtomicU32::new(0));

        interrupt::without_interrupts(|| {
            for _ in 0..3 {
                let l = lock.clone();
                let c = cond.clone();
                let r = ready.clone();
                let count = woke_count.clone();
                scheduler::spawn("waiter", crate::thread::LOWEST_PRIORITY, -1, move || {
                    l.acquire();
                    while !*r.lock().unwrap() {
                        c.wait(&l);
                    }
                    count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    l.release();
                })
                .unwrap();
            }
            let l = lock.clone();
            let c = cond.clone();
            let r = ready.clone();
            scheduler::spawn("signaler", crate::thread::LOWEST_PRIORITY, -1, move || {
                l.acquire();
                *r.lock().unwrap() = true;
                c.broadcast(&l);
                l.release();
            })
            .unwrap();
        });

        scheduler::start();
        assert_eq!(woke_count.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
