//! Thread control blocks.
//!
//! A [`Thread`] is metadata: its tid, its scheduling state, its priority,
//! and the bookkeeping the scheduler needs to run it fairly. The actual
//! execution is carried by a real OS thread (see [`crate::switch`]); the
//! `Thread` struct plays the role the original design's stack and saved
//! register bank played, minus the bytes that are now the host OS's
//! problem.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Maximum number of simultaneously live threads, matching the original
/// `MAX_THREAD_NUM`.
pub const MAX_THREAD_NUM: usize = 128;

/// Number of priority levels (0 = highest, 4 = lowest).
pub const PRIORITY_LEVELS: usize = 5;

/// The lowest (worst) priority a thread can hold.
pub const LOWEST_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

/// The highest priority a thread can hold.
pub const HIGHEST_PRIORITY: u8 = 0;

/// Per-class time-slice quanta, in ticks, indexed by priority.
pub const TIME_SLICE_QUANTA: [u32; PRIORITY_LEVELS] = [10, 20, 30, 40, 50];

/// Number of words in a thread's simulated stack, mirroring the original
/// `StackSize` (4 KiB of words).
pub const STACK_SIZE_WORDS: usize = 4 * 1024;

/// The value written at the foot of a thread's simulated stack. If this
/// ever changes, the thread has overflowed it.
const STACK_CANARY: u64 = 0xDEAD_C0DE_FEED_BEEF;

/// Uniquely identifies a thread for the lifetime of the simulator process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub(crate) u32);

impl ThreadId {
    /// The reserved id for the idle thread. It never appears in the tid
    /// table and is never placed on a ready queue.
    pub const IDLE: ThreadId = ThreadId(0);

    /// Returns a plain numeric view of the id, for logging.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tid({})", self.0)
    }
}

/// Describes the scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Allocated but not yet placed on a ready queue.
    JustCreated,
    /// Currently holding the (simulated) CPU.
    Running,
    /// Runnable, waiting on a ready queue.
    Ready,
    /// Waiting on a semaphore, lock, condition, or disk completion.
    Blocked,
}

/// A simulated kernel stack, used only to detect overflow; the thread's
/// real execution stack belongs to the host OS thread carrying it.
#[derive(Debug)]
struct SimulatedStack {
    words: Vec<u64>,
}

impl SimulatedStack {
    fn new() -> Self {
        let mut words = vec![0u64; STACK_SIZE_WORDS];
        words[0] = STACK_CANARY;
        SimulatedStack { words }
    }

    fn check_overflow(&self) {
        if self.words[0] != STACK_CANARY {
            panic!("stack overflow detected: canary word has been overwritten");
        }
    }

    /// Simulates a deep recursive write, for tests that want to trigger
    /// the overflow panic deliberately.
    #[cfg(test)]
    fn corrupt(&mut self) {
        self.words[0] = 0;
    }
}

/// A thread control block.
///
/// `Thread` tracks everything the scheduler needs: identity, priority,
/// accounting, and scheduling state. It does not hold an address space
/// directly (see `vm::address_space_of`) to avoid a dependency cycle
/// between the `threads` and `vm` crates.
pub struct Thread {
    tid: ThreadId,
    uid: i32,
    name: String,
    priority: AtomicU32,
    state: Mutex<ThreadState>,
    used_ticks: AtomicU64,
    start_time: AtomicU64,
    stack: Mutex<SimulatedStack>,
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("priority", &self.priority.load(Ordering::Relaxed))
            .field("state", &*self.state.lock().unwrap())
            .finish()
    }
}

impl Thread {
    pub(crate) fn new(tid: ThreadId, uid: i32, name: String, priority: u8) -> Thread {
        Thread {
            tid,
            uid,
            name,
            priority: AtomicU32::new(priority as u32),
            state: Mutex::new(ThreadState::JustCreated),
            used_ticks: AtomicU64::new(0),
            start_time: AtomicU64::new(0),
            stack: Mutex::new(SimulatedStack::new()),
        }
    }

    /// This thread's unique id.
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    /// The user id this thread is running on behalf of.
    pub fn uid(&self) -> i32 {
        self.uid
    }

    /// The thread's name, for debugging. Not guaranteed unique.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The thread's current priority (0 = highest, 4 = lowest).
    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::SeqCst) as u8
    }

    pub(crate) fn set_priority(&self, p: u8) {
        self.priority.store(p as u32, Ordering::SeqCst);
    }

    /// The thread's current scheduling state.
    pub fn state(&self) -> ThreadState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, s: ThreadState) {
        *self.state.lock().unwrap() = s;
    }

    /// Ticks consumed since `used_ticks` was last reset.
    pub fn used_ticks(&self) -> u32 {
        self.used_ticks.load(Ordering::SeqCst) as u32
    }

    pub(crate) fn set_used_ticks(&self, ticks: u32) {
        self.used_ticks.store(ticks as u64, Ordering::SeqCst);
    }

    pub(crate) fn add_used_ticks(&self, delta: u32) {
        self.used_ticks.fetch_add(delta as u64, Ordering::SeqCst);
    }

    /// The simulated clock tick at which this thread most recently became
    /// the running thread.
    pub fn start_time(&self) -> u64 {
        self.start_time.load(Ordering::SeqCst)
    }

    pub(crate) fn set_start_time(&self, now: u64) {
        self.start_time.store(now, Ordering::SeqCst);
    }

    /// Verifies the thread's simulated stack canary is intact.
    ///
    /// # Panics
    ///
    /// Panics if the canary has been overwritten, mirroring the fatal
    /// stack-overflow contract violation in §7.
    pub(crate) fn check_stack_overflow(&self) {
        self.stack.lock().unwrap().check_overflow();
    }

    #[cfg(test)]
    pub(crate) fn corrupt_stack_for_test(&self) {
        self.stack.lock().unwrap().corrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_thread_starts_just_created() {
        let t = Thread::new(ThreadId(7), -1, "test".into(), HIGHEST_PRIORITY);
        assert_eq!(t.state(), ThreadState::JustCreated);
        assert_eq!(t.priority(), HIGHEST_PRIORITY);
        assert_eq!(t.used_ticks(), 0);
    }

    #[test]
    fn stack_overflow_is_detected() {
        let t = Thread::new(ThreadId(1), -1, "overflow".into(), LOWEST_PRIORITY);
        t.check_stack_overflow();
        t.corrupt_stack_for_test();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            t.check_stack_overflow();
        }));
        assert!(result.is_err());
    }

    #[test]
    fn priority_demotion_floor() {
        let t = Thread::new(ThreadId(2), -1, "demote".into(), LOWEST_PRIORITY);
        assert_eq!(t.priority(), LOWEST_PRIORITY);
    }
}
