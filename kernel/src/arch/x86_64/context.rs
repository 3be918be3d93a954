//! Minimal context switch: six callee-saved registers and the stack
//! pointer, nothing else.
//!
//! A freshly created task's stack is laid out as if `switch_to` had just
//! pushed its callee-saved frame on top of a synthetic return frame whose
//! address is the entry function (`sched::task::Task::new`), so the first
//! switch into it returns directly into the entry function with no special
//! bootstrap path.

use core::arch::naked_asm;

/// Saves `rsp` into `*prev_sp` and loads it from `*next_sp`, after pushing
/// (and, on the way back, popping) rbx/rbp/r12-r15 -- the SysV callee-saved
/// set other than rsp itself.
#[cfg(target_os = "none")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch_to(prev_sp: *mut u64, next_sp: *const u64) {
    naked_asm!(
        "push rbx",
        "push rbp",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, [rsi]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbp",
        "pop rbx",
        "ret",
    );
}

/// Host test target stand-in: a real register-level stack swap would jump
/// into the target task's synthetic entry frame and never return to the
/// test harness, since there's no second kernel stack actually running on
/// this CPU. `sched` tests only assert on bookkeeping performed before this
/// call (e.g. the `CURRENT` index), so a no-op is equivalent for their
/// purposes.
#[cfg(not(target_os = "none"))]
pub unsafe extern "C" fn switch_to(_prev_sp: *mut u64, _next_sp: *const u64) {}
