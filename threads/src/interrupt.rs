//! The simulated interrupt flag.
//!
//! The simulator is strictly single-threaded and cooperative: "disabling
//! interrupts" is the only atomic primitive the rest of the kernel has to
//! build on. Every place that mutates shared scheduler state (the ready
//! queues, `currentThread`, the tid table) does so with interrupts
//! disabled, exactly as the original design mandates.

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the simulated interrupt line is enabled.
///
/// `true` means interrupts are on (the normal running state); `false`
/// means a critical section is in progress.
static ENABLED: AtomicBool = AtomicBool::new(true);

/// Describes the simulated interrupt level, returned by [`set_level`] so
/// the caller can restore it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntLevel {
    /// Interrupts are disabled.
    Off,
    /// Interrupts are enabled.
    On,
}

impl IntLevel {
    fn from_bool(enabled: bool) -> Self {
        if enabled {
            IntLevel::On
        } else {
            IntLevel::Off
        }
    }

    fn as_bool(self) -> bool {
        matches!(self, IntLevel::On)
    }
}

/// Returns the current interrupt level without changing it.
pub fn level() -> IntLevel {
    IntLevel::from_bool(ENABLED.load(Ordering::SeqCst))
}

/// Sets the interrupt level, returning the previous level.
///
/// This is the machine's `SetLevel`: every kernel critical section saves
/// the level it found, does its work, then restores exactly that level
/// (not unconditionally re-enabling), so nested critical sections compose.
pub fn set_level(new_level: IntLevel) -> IntLevel {
    let old = ENABLED.swap(new_level.as_bool(), Ordering::SeqCst);
    IntLevel::from_bool(old)
}

/// Disables interrupts and returns the level that was in effect before.
pub fn disable() -> IntLevel {
    set_level(IntLevel::Off)
}

/// Enables interrupts unconditionally.
pub fn enable() {
    set_level(IntLevel::On);
}

/// Panics unless interrupts are currently disabled.
///
/// A handful of scheduler entry points (`ready_to_run`, `sleep`) require
/// their caller to already hold the simulated critical section; this is
/// how that contract is enforced instead of silently doing the wrong
/// thing.
#[track_caller]
pub fn assert_disabled(what: &str) {
    if level() != IntLevel::Off {
        panic!("{what} called with interrupts enabled");
    }
}

/// Runs `f` with interrupts disabled, restoring the previous level
/// afterwards (even if `f` changed it, mirroring the machine's behavior of
/// restoring the saved level rather than blindly re-enabling).
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let old = disable();
    let result = f();
    set_level(old);
    result
}

#[cfg(test)]
mod tests {
    // These share the one process-wide interrupt flag, so they run as a
    // single test to avoid racing against each other under the default
    // parallel test runner.
    use super::*;

    #[test]
    fn level_transitions() {
        enable();
        assert_eq!(level(), IntLevel::On);

        let prev = disable();
        assert_eq!(prev, IntLevel::On);
        assert_eq!(level(), IntLevel::Off);

        without_interrupts(|| {
            assert_eq!(level(), IntLevel::Off);
            without_interrupts(|| {
                assert_eq!(level(), IntLevel::Off);
            });
            assert_eq!(level(), IntLevel::Off);
        });
        assert_eq!(level(), IntLevel::Off);

        enable();
        assert_eq!(level(), IntLevel::On);
    }
}
