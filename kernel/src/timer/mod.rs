//! Tick counter and preemption request flag.
//!
//! The timer interrupt handler ([`crate::arch::x86_64::timer::tick`]) calls
//! [`tick`] on every PIT interrupt. This runs in interrupt context, so it
//! must touch only atomics -- never the task-subsystem locks, which could
//! already be held by the task it just preempted.

use core::sync::atomic::{AtomicU64, Ordering};

/// How many ticks elapse between preemption requests.
const TICKS_PER_SCHEDULE: u64 = 10;

static TICKS: AtomicU64 = AtomicU64::new(0);
static NEED_SCHEDULE: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Called from the timer interrupt handler. Increments the tick counter and,
/// every [`TICKS_PER_SCHEDULE`] ticks, sets the preemption request flag.
pub fn tick() {
    let count = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    if count % TICKS_PER_SCHEDULE == 0 {
        NEED_SCHEDULE.store(true, Ordering::Release);
    }
}

/// Total ticks observed since boot.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Whether a preemption request is pending.
pub fn need_schedule() -> bool {
    NEED_SCHEDULE.load(Ordering::Acquire)
}

/// Atomically clears the preemption request flag, returning whether it was
/// set. Used by `yield()` to consume the request before calling `schedule`.
pub fn take_need_schedule() -> bool {
    NEED_SCHEDULE.swap(false, Ordering::AcqRel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_sets_after_threshold_ticks() {
        TICKS.store(0, Ordering::Relaxed);
        NEED_SCHEDULE.store(false, Ordering::Relaxed);
        for _ in 0..TICKS_PER_SCHEDULE {
            tick();
        }
        assert!(take_need_schedule());
        assert!(!take_need_schedule());
    }
}
