//! Counting semaphores, the kernel's one primitive synchronization tool.
//!
//! `Lock` and `Condition` are both built on top of this, exactly as in the
//! original design: everything else in §4.3 reduces to P/V plus a disabled
//! interrupt section.

use crate::interrupt;
use crate::scheduler;
use crate::thread::{ThreadId, ThreadState};
use std::collections::VecDeque;
use std::sync::Mutex;

struct Inner {
    value: i32,
    waiting: VecDeque<ThreadId>,
}

/// A counting semaphore with a FIFO wait queue.
pub struct Semaphore {
    name: String,
    inner: Mutex<Inner>,
}

impl Semaphore {
    /// Creates a semaphore with the given starting value.
    pub fn new(name: impl Into<String>, initial_value: i32) -> Semaphore {
        Semaphore {
            name: name.into(),
            inner: Mutex::new(Inner {
                value: initial_value,
                waiting: VecDeque::new(),
            }),
        }
    }

    /// The semaphore's name, for debugging.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits until the semaphore's value is positive, then decrements it.
    ///
    /// Blocks the calling thread (putting it to sleep) rather than
    /// spin-waiting, exactly as the original `P` does.
    pub fn p(&self) {
        interrupt::disable();
        loop {
            let mut inner = self.inner.lock().unwrap();
            if inner.value > 0 {
                inner.value -= 1;
                break;
            }
            let me = scheduler::current_tid();
            inner.waiting.push_back(me);
            drop(inner);
            scheduler::current_thread().set_state(ThreadState::Blocked);
            scheduler::sleep();
        }
        interrupt::enable();
    }

    /// Increments the semaphore's value, waking one waiter if any are
    /// queued.
    pub fn v(&self) {
        interrupt::disable();
        let woken = {
            let mut inner = self.inner.lock().unwrap();
            inner.value += 1;
            inner.waiting.pop_front()
        };
        if let Some(tid) = woken {
            scheduler::ready_to_run(tid);
        }
        interrupt::enable();
    }
}
