//! The machine-level stack-switch primitive.
//!
//! The original design switches CPU context with a hand-written assembly
//! routine that saves one thread's register bank and loads another's. This
//! simulator runs as an ordinary host process with no access to real
//! register banks, so each kernel thread is carried by its own native OS
//! thread, and a "context switch" becomes a baton handoff: exactly one
//! kernel thread's carrier is allowed to run at a time, and
//! [`switch_to`]/[`park_until_scheduled`] are the only two places that move
//! the baton. Everything above this module (the scheduler, `sleep`,
//! `yield_now`) is unaware that the underlying carrier is a real OS
//! thread rather than a saved stack pointer.

use crate::thread::ThreadId;
use std::sync::{Condvar, Mutex};

struct Baton {
    running: Mutex<ThreadId>,
    moved: Condvar,
}

static BATON: std::sync::OnceLock<Baton> = std::sync::OnceLock::new();

fn baton() -> &'static Baton {
    BATON.get_or_init(|| Baton {
        running: Mutex::new(ThreadId::IDLE),
        moved: Condvar::new(),
    })
}

/// Hands the baton to `next`, waking whichever carrier is parked waiting
/// for it. Does not block the caller.
pub(crate) fn switch_to(next: ThreadId) {
    let b = baton();
    let mut running = b.running.lock().unwrap();
    *running = next;
    b.moved.notify_all();
}

/// Parks the calling carrier until the baton is handed to `me`.
///
/// This is the second half of a context switch: after `switch_to` hands
/// off to the next thread, the outgoing thread's carrier calls this with
/// its own id and blocks here until it is scheduled again, at which point
/// it resumes exactly where this call returns — the stack-pointer swap of
/// the original design, achieved by simply never unwinding the native
/// stack in the first place.
pub(crate) fn park_until_scheduled(me: ThreadId) {
    let b = baton();
    let mut running = b.running.lock().unwrap();
    while *running != me {
        running = b.moved.wait(running).unwrap();
    }
}

/// Performs a full context switch: hands the baton to `next`, then blocks
/// the calling carrier (which belongs to `from`) until it is scheduled
/// again.
pub(crate) fn switch_stack(from: ThreadId, next: ThreadId) {
    switch_to(next);
    park_until_scheduled(from);
}
