//! The multilevel-feedback-queue scheduler.
//!
//! Five FIFO ready queues, one per priority level, plus the bookkeeping
//! (`currentThread`, the tid table, the pending-destruction slot) that the
//! original design keeps as process-wide globals. Every function here that
//! mutates that state requires interrupts to already be disabled by its
//! caller — §4.1 and §5 both call this out as the sole atomicity
//! primitive available to a uniprocessor cooperative kernel.

use crate::interrupt::{self, assert_disabled};
use crate::switch;
use crate::thread::{
    Thread, ThreadId, ThreadState, LOWEST_PRIORITY, MAX_THREAD_NUM, PRIORITY_LEVELS,
    TIME_SLICE_QUANTA,
};
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Hook for saving/restoring a thread's user-level state (its address
/// space, in practice) around a context switch.
///
/// `threads` has no dependency on the `vm` crate, so `vm` registers an
/// implementation of this trait at start-up (mirroring how the `log`
/// facade is bound to a concrete logger), breaking what would otherwise be
/// a dependency cycle between "a thread may own an address space" and
/// "an address space is owned by a thread".
pub trait UserStateHost: Send + Sync {
    /// Saves `tid`'s user-level registers/address-space pointer before it
    /// is switched out. A no-op for kernel threads with no address space.
    fn save_state(&self, tid: ThreadId);
    /// Restores `tid`'s user-level registers/address-space pointer after
    /// it has been switched in.
    fn restore_state(&self, tid: ThreadId);
    /// Called once per simulated timer tick, before timers are checked.
    /// The TLB's LRU replacement counters are aged here (§4.5: "LRU
    /// counters incremented on each timer tick"); a host with no TLB is a
    /// no-op.
    fn on_tick(&self) {}
}

struct NullUserStateHost;
impl UserStateHost for NullUserStateHost {
    fn save_state(&self, _tid: ThreadId) {}
    fn restore_state(&self, _tid: ThreadId) {}
}

static USER_STATE_HOST: OnceLock<&'static dyn UserStateHost> = OnceLock::new();

/// Registers the hook `vm` uses to save/restore address-space state
/// across context switches. Only the first registration takes effect.
pub fn register_user_state_host(host: &'static dyn UserStateHost) {
    let _ = USER_STATE_HOST.set(host);
}

fn user_state_host() -> &'static dyn UserStateHost {
    *USER_STATE_HOST.get_or_init(|| &NullUserStateHost)
}

/// Errors the scheduler can report without aborting the simulator.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// `AssignTID` found every slot in the tid table occupied.
    #[error("no free thread id: all {0} slots in use")]
    OutOfThreadIds(usize),
}

struct TidTable {
    in_use: [bool; MAX_THREAD_NUM],
    current_max_tid: i64,
}

impl TidTable {
    fn new() -> Self {
        TidTable {
            in_use: [false; MAX_THREAD_NUM],
            current_max_tid: -1,
        }
    }

    /// Linear scan from `current_max_tid + 1`, wrapping modulo
    /// `MAX_THREAD_NUM`, skipping slot 0 (reserved for the idle thread).
    /// Returns `None` if every slot is occupied.
    fn assign(&mut self) -> Option<ThreadId> {
        let start = (self.current_max_tid + 1).rem_euclid(MAX_THREAD_NUM as i64) as usize;
        let mut candidate = start;
        for _ in 0..MAX_THREAD_NUM {
            if candidate != 0 && !self.in_use[candidate] {
                self.in_use[candidate] = true;
                self.current_max_tid = candidate as i64;
                return Some(ThreadId(candidate as u32));
            }
            candidate = (candidate + 1) % MAX_THREAD_NUM;
        }
        None
    }

    fn free(&mut self, tid: ThreadId) {
        self.in_use[tid.as_u32() as usize] = false;
    }
}

/// A pending wake-up: at `due`, `ready_to_run(tid)` should be invoked. Used
/// both for `sleep_for`-style delays and for the page-fault handler's
/// simulated disk-completion interrupt.
struct Timer {
    due: u64,
    seq: u64,
    tid: ThreadId,
}

struct Registry {
    threads: Mutex<HashMap<ThreadId, Arc<Thread>>>,
    tids: Mutex<TidTable>,
    current: Mutex<Arc<Thread>>,
    to_be_destroyed: Mutex<Option<Arc<Thread>>>,
    ready: Mutex<[VecDeque<ThreadId>; PRIORITY_LEVELS]>,
    clock: AtomicU64,
    timers: Mutex<Vec<Timer>>,
    timer_seq: AtomicU64,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let idle = Arc::new(Thread::new(ThreadId::IDLE, -1, "idle".into(), LOWEST_PRIORITY));
        idle.set_state(ThreadState::Running);
        Registry {
            threads: Mutex::new(HashMap::new()),
            tids: Mutex::new(TidTable::new()),
            current: Mutex::new(idle),
            to_be_destroyed: Mutex::new(None),
            ready: Mutex::new([
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ]),
            clock: AtomicU64::new(0),
            timers: Mutex::new(Vec::new()),
            timer_seq: AtomicU64::new(0),
        }
    })
}

/// Returns the currently executing thread.
pub fn current_thread() -> Arc<Thread> {
    registry().current.lock().unwrap().clone()
}

/// Returns the currently executing thread's id.
pub fn current_tid() -> ThreadId {
    current_thread().tid()
}

/// The simulated clock, in ticks. Advances only via [`tick`] or when the
/// dispatch loop in [`start`] fast-forwards past an idle gap to the next
/// pending timer.
pub fn now() -> u64 {
    registry().clock.load(Ordering::SeqCst)
}

fn thread_for(tid: ThreadId) -> Option<Arc<Thread>> {
    registry().threads.lock().unwrap().get(&tid).cloned()
}

/// Creates a new thread, allocating a tid, but does not make it runnable.
/// The caller must call [`ready_to_run`] (with interrupts disabled) to
/// schedule it, or use [`spawn`] to do both in one step.
///
/// `entry` runs on the thread's own native carrier the first time it is
/// scheduled; when `entry` returns, the thread calls [`finish`]
/// automatically.
pub fn create(
    name: impl Into<String>,
    priority: u8,
    uid: i32,
    entry: impl FnOnce() + Send + 'static,
) -> Result<ThreadId, SchedulerError> {
    let tid = {
        let mut tids = registry().tids.lock().unwrap();
        tids.assign().ok_or(SchedulerError::OutOfThreadIds(MAX_THREAD_NUM))?
    };

    let thread = Arc::new(Thread::new(tid, uid, name.into(), priority));
    registry().threads.lock().unwrap().insert(tid, thread.clone());
    debug!("created thread {} ({:?})", tid, thread.name());

    std::thread::Builder::new()
        .name(format!("kthread-{}", tid.as_u32()))
        .spawn(move || {
            switch::park_until_scheduled(tid);
            on_resumed(tid, true);
            interrupt::enable();
            entry();
            finish();
        })
        .expect("failed to spawn carrier thread for new kernel thread");

    Ok(tid)
}

/// Creates a thread and immediately makes it runnable.
pub fn spawn(
    name: impl Into<String>,
    priority: u8,
    uid: i32,
    entry: impl FnOnce() + Send + 'static,
) -> Result<ThreadId, SchedulerError> {
    let tid = create(name, priority, uid, entry)?;
    interrupt::without_interrupts(|| ready_to_run(tid));
    Ok(tid)
}

/// Marks `t` as ready to run and appends it to the ready queue for its
/// (possibly just-demoted) priority class.
///
/// # Panics
///
/// Panics if interrupts are not disabled, or if `t` is not a known
/// thread.
pub fn ready_to_run(t: ThreadId) {
    assert_disabled("ready_to_run");
    let thread = thread_for(t).unwrap_or_else(|| panic!("ready_to_run: unknown thread {t}"));

    let old_status = thread.state();
    thread.set_state(ThreadState::Ready);

    let prio = thread.priority();
    let mut new_prio = prio;
    if old_status != ThreadState::JustCreated
        && thread.used_ticks() >= TIME_SLICE_QUANTA[prio as usize]
    {
        new_prio = (prio + 1).min(LOWEST_PRIORITY);
        thread.set_priority(new_prio);
        thread.set_used_ticks(0);
        trace!("demoting thread {t} from priority {prio} to {new_prio}");
    }

    registry().ready.lock().unwrap()[new_prio as usize].push_back(t);
}

/// Returns the next thread able to run, removing it from the ready queue.
///
/// If the current thread is still `Running` and has not exhausted its
/// time slice, returns it without touching the ready queues.
fn find_next_to_run() -> Option<ThreadId> {
    assert_disabled("find_next_to_run");
    let current = current_thread();
    let prio = current.priority();
    if current.state() == ThreadState::Running && current.used_ticks() < TIME_SLICE_QUANTA[prio as usize] {
        return Some(current.tid());
    }

    let mut ready = registry().ready.lock().unwrap();
    for queue in ready.iter_mut() {
        if let Some(tid) = queue.pop_front() {
            return Some(tid);
        }
    }
    None
}

fn on_resumed(now_tid: ThreadId, changed: bool) {
    if changed {
        if let Some(t) = thread_for(now_tid) {
            t.set_start_time(now());
        }
    }

    if let Some(dead) = registry().to_be_destroyed.lock().unwrap().take() {
        let mut tids = registry().tids.lock().unwrap();
        tids.free(dead.tid());
        drop(tids);
        registry().threads.lock().unwrap().remove(&dead.tid());
        debug!("destroyed thread {}", dead.tid());
    }

    user_state_host().restore_state(now_tid);
}

/// Dispatches the CPU to `next`, performing a full context switch unless
/// `next` is already the running thread.
fn run(next: ThreadId) {
    let old = current_thread();
    user_state_host().save_state(old.tid());
    old.check_stack_overflow();

    if old.tid() == next {
        return;
    }

    let next_thread =
        thread_for(next).unwrap_or_else(|| panic!("run: unknown thread {next}"));
    *registry().current.lock().unwrap() = next_thread.clone();
    next_thread.set_state(ThreadState::Running);

    trace!("switching from {} to {}", old.tid(), next);
    switch::switch_stack(old.tid(), next);

    // We only resume here once `old` has been scheduled again.
    on_resumed(old.tid(), true);
}

/// Advances the simulated clock by one tick, charging it to the running
/// thread (the idle thread is never charged) and firing any timers whose
/// deadline has arrived.
pub fn tick() {
    registry().clock.fetch_add(1, Ordering::SeqCst);
    let current = current_thread();
    if current.tid() != ThreadId::IDLE {
        current.add_used_ticks(1);
    }
    user_state_host().on_tick();
    fire_due_timers();
}

/// Schedules `ready_to_run(tid)` to run `delay` ticks from now.
pub fn schedule_wakeup(tid: ThreadId, delay: u32) {
    let seq = registry().timer_seq.fetch_add(1, Ordering::SeqCst);
    let due = now() + delay as u64;
    registry().timers.lock().unwrap().push(Timer { due, seq, tid });
}

fn fire_due_timers() {
    let due_now: Vec<ThreadId> = {
        let mut timers = registry().timers.lock().unwrap();
        let now = now();
        timers.sort_by_key(|t| (t.due, t.seq));
        let split = timers.partition_point(|t| t.due <= now);
        timers.drain(..split).map(|t| t.tid).collect()
    };
    for tid in due_now {
        interrupt::without_interrupts(|| {
            // A thread may have already been resumed by some other means
            // (e.g. a matching semaphore V) by the time its timer fires.
            if let Some(t) = thread_for(tid) {
                if t.state() == ThreadState::Blocked {
                    ready_to_run(tid);
                }
            }
        });
    }
}

/// Fast-forwards the simulated clock directly to the next pending timer
/// and fires it. Returns `false` if there are no pending timers, meaning
/// the simulator has genuinely run out of work.
fn advance_to_next_timer() -> bool {
    let next_due = registry().timers.lock().unwrap().iter().map(|t| t.due).min();
    match next_due {
        Some(due) => {
            let current = now();
            if due > current {
                registry().clock.store(due, Ordering::SeqCst);
            }
            fire_due_timers();
            true
        }
        None => false,
    }
}

/// Marks the current thread `Blocked`, without yet switching off it.
///
/// Callers outside this crate (the semaphore/lock/condition primitives
/// live inside it and mutate state directly) use this plus [`sleep`] to
/// park on some external event — a disk-completion timer, in the
/// page-fault handler's case — the same two-step sequence §4.5 and §5
/// describe as a suspension point.
///
/// # Panics
///
/// Panics if interrupts are not disabled.
pub fn block_current() {
    assert_disabled("block_current");
    current_thread().set_state(ThreadState::Blocked);
}

/// Puts the current thread to sleep (removing it from scheduling
/// contention) and switches to the next runnable thread.
///
/// # Panics
///
/// Panics if interrupts are not disabled.
pub fn sleep() {
    assert_disabled("sleep");
    loop {
        match find_next_to_run() {
            Some(next) => {
                run(next);
                return;
            }
            None => {
                if !advance_to_next_timer() {
                    // Nothing runnable and no pending timers: hand off to
                    // the idle thread, which represents the bootstrap
                    // carrier waiting for the simulation to end.
                    run(ThreadId::IDLE);
                    return;
                }
            }
        }
    }
}

/// Voluntarily relinquishes the CPU if another thread is ready to run.
///
/// # Panics
///
/// Panics if interrupts are not disabled.
pub fn yield_now() {
    assert_disabled("yield_now");
    let current = current_thread();
    match find_next_to_run() {
        Some(next) if next != current.tid() => {
            ready_to_run(current.tid());
            run(next);
        }
        _ => {}
    }
}

/// Terminates the current thread for good. Never returns.
///
/// # Panics
///
/// Panics if called by the idle thread.
pub fn finish() -> ! {
    let old = interrupt::disable();
    let current = current_thread();
    if current.tid() == ThreadId::IDLE {
        panic!("idle thread tried to finish");
    }

    current.set_state(ThreadState::Blocked);
    *registry().to_be_destroyed.lock().unwrap() = Some(current);
    sleep();
    let _ = old;
    unreachable!("a destroyed thread was somehow rescheduled");
}

/// Runs the scheduler loop until no thread remains runnable or blocked
/// with a pending wake-up — i.e. until the whole simulated workload has
/// finished. This is the counterpart of the idle thread's "wait for an
/// interrupt" loop: rather than spin on a real timer, the discrete-event
/// clock is fast-forwarded straight to the next thing that can happen.
pub fn start() {
    interrupt::disable();
    loop {
        if registry().threads.lock().unwrap().is_empty()
            && registry().to_be_destroyed.lock().unwrap().is_none()
        {
            break;
        }
        match find_next_to_run() {
            Some(next) => run(next),
            None => {
                if !advance_to_next_timer() {
                    break;
                }
            }
        }
    }
    interrupt::enable();
}

/// Prints the scheduling state of every live thread, for debugging.
pub fn debug_dump() {
    for thread in registry().threads.lock().unwrap().values() {
        log::debug!(
            "{} {}: {:?} (priority {})",
            thread.tid(),
            thread.name(),
            thread.state(),
            thread.priority()
        );
    }
}
