//! Task control block.
//!
//! A task owns a fixed-size kernel stack, prepared at creation so the first
//! `switch_to` into it returns directly into its entry function -- no
//! special first-task path is needed.

use core::alloc::Layout;

use alloc::string::String;

use crate::arch::x86_64::context::switch_to as arch_switch_to;

/// Fixed kernel stack size per task.
pub const KERNEL_STACK_SIZE: usize = 8 * 1024;
/// Longest task name retained; longer names are truncated at creation.
pub const MAX_NAME_LEN: usize = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Zombie,
}

/// Saved stack pointer; the callee-saved registers themselves live on the
/// stack `switch_to`'s prologue/epilogue push and pop.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub sp: u64,
}

pub struct Task {
    pub pid: u64,
    pub parent_pid: u64,
    pub state: TaskState,
    pub context: Context,
    pub name: String,
    pub exit_code: i32,

    /// Arena-index ready-list links, not raw pointers.
    pub prev: Option<usize>,
    pub next: Option<usize>,

    stack_ptr: *mut u8,
    stack_layout: Layout,
}

// SAFETY: a `Task`'s stack pointer is exclusively owned by the task
// subsystem, which only ever touches it from behind the ready-queue /
// current-task locks.
unsafe impl Send for Task {}

impl Task {
    /// Allocates a stack and prepares it as if `switch_to` had just pushed
    /// six zeroed callee-saved registers on top of a synthetic return frame
    /// whose address is `entry`.
    pub fn new(pid: u64, parent_pid: u64, entry: extern "C" fn() -> !, name: &str) -> Option<Self> {
        let layout = Layout::from_size_align(KERNEL_STACK_SIZE, 16).ok()?;
        // SAFETY: `layout` has non-zero size and a valid alignment.
        let stack_ptr = unsafe { alloc::alloc::alloc(layout) };
        if stack_ptr.is_null() {
            return None;
        }

        // A `call` leaves rsp % 16 == 8 at the callee's entry; emulate that
        // so entry's prologue sees the alignment it expects.
        let aligned_top = (stack_ptr as u64 + KERNEL_STACK_SIZE as u64) & !0xF;
        let call_equivalent_top = aligned_top - 8;
        let frame_bottom = call_equivalent_top - 48;

        // SAFETY: `frame_bottom..frame_bottom+56` lies within the stack we
        // just allocated (56 <= KERNEL_STACK_SIZE).
        unsafe {
            let frame = frame_bottom as *mut u64;
            for i in 0..6 {
                frame.add(i).write(0);
            }
            frame.add(6).write(entry as usize as u64);
        }

        let mut name = String::from(name);
        name.truncate(MAX_NAME_LEN);

        Some(Self {
            pid,
            parent_pid,
            state: TaskState::Ready,
            context: Context { sp: frame_bottom },
            name,
            exit_code: 0,
            prev: None,
            next: None,
            stack_ptr,
            stack_layout: layout,
        })
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // SAFETY: `stack_ptr`/`stack_layout` are exactly what `alloc::alloc`
        // returned for this task and are never freed elsewhere.
        unsafe {
            alloc::alloc::dealloc(self.stack_ptr, self.stack_layout);
        }
    }
}

/// Saves `prev`'s stack pointer and switches to `next`'s.
///
/// # Safety
/// Both contexts must belong to tasks whose stacks remain valid for the
/// duration of the switch, and neither the ready-queue nor current-task
/// lock may be held across this call.
pub unsafe fn switch_to(prev: &mut Context, next: &Context) {
    // SAFETY: forwarded to the caller's safety obligations.
    unsafe {
        arch_switch_to(&mut prev.sp as *mut u64, &next.sp as *const u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy_entry() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    #[test]
    fn new_task_starts_ready_with_truncated_name() {
        let long_name = "x".repeat(64);
        let task = Task::new(1, 0, dummy_entry, &long_name).expect("allocation should succeed");
        assert_eq!(task.state, TaskState::Ready);
        assert_eq!(task.name.len(), MAX_NAME_LEN);
        assert_eq!(task.pid, 1);
    }

    #[test]
    fn stack_frame_points_at_entry() {
        let task = Task::new(2, 0, dummy_entry, "t").unwrap();
        // SAFETY: sp was written by Task::new to point at the synthetic
        // frame's first slot; reading it back doesn't mutate the stack.
        let entry_slot = unsafe { *((task.context.sp + 48) as *const u64) };
        assert_eq!(entry_slot, dummy_entry as usize as u64);
    }
}
