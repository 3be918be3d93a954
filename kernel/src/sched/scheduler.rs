//! Round-robin scheduling over the ready list.
//!
//! Two locks guard all state: `QUEUE` (the ready list) and `CURRENT` (the
//! running task's arena index). Every public entry point that touches both
//! acquires `QUEUE` first, and neither is ever held across
//! `task::switch_to` -- the raw context pointers used in that call are
//! taken from the arena and the locks released before the actual register
//! save/restore runs.

use spin::Mutex;

use super::{
    queue::ReadyQueue,
    task::{Context, Task, TaskState},
};
use crate::error::KernelError;

static QUEUE: Mutex<ReadyQueue> = Mutex::new(ReadyQueue::new());
static CURRENT: Mutex<Option<usize>> = Mutex::new(None);
static NEXT_PID: Mutex<u64> = Mutex::new(1);

/// Stands in for "the task that called into the scheduler for the first
/// time" so `schedule` never needs a special bootstrap-only code path: its
/// `sp` is simply overwritten by the first `switch_to` and never read back.
static BOOTSTRAP_CONTEXT: Mutex<Context> = Mutex::new(Context { sp: 0 });

/// Reserves the ready list's fixed arena capacity. Must run once, before
/// the first `create`.
pub fn init() {
    QUEUE.lock().init();
    crate::println!("[SCHED] ready queue initialized, capacity {}", super::queue::MAX_TASKS);
}

fn alloc_pid() -> u64 {
    let mut next = NEXT_PID.lock();
    let pid = *next;
    *next += 1;
    pid
}

/// Creates a new ready task and returns its pid, or `None` if the ready
/// list is at capacity or the stack allocation failed.
pub fn create(entry: extern "C" fn() -> !, name: &str) -> Option<u64> {
    let pid = alloc_pid();
    let task = Task::new(pid, current_pid().unwrap_or(0), entry, name)?;

    let mut queue = QUEUE.lock();
    queue.insert_head(task)?;
    Some(pid)
}

/// Pid of the currently running task, or `None` before the first `schedule`.
pub fn current_pid() -> Option<u64> {
    let current = *CURRENT.lock();
    let queue = QUEUE.lock();
    current.and_then(|index| queue.get(index)).map(|t| t.pid)
}

/// Picks the task after the current one in ready order and switches to it.
/// A no-op if there is nothing else ready to run.
pub fn schedule() {
    let mut queue = QUEUE.lock();
    let mut current = CURRENT.lock();

    if queue.is_empty() {
        return;
    }

    let next_index = match *current {
        Some(index) => match queue.next_of(index) {
            Some(next) => next,
            None => return,
        },
        None => match queue.head() {
            Some(head) => head,
            None => return,
        },
    };

    if *current == Some(next_index) {
        return;
    }

    if let Some(index) = *current {
        if let Some(task) = queue.get_mut(index) {
            if task.state == TaskState::Running {
                task.state = TaskState::Ready;
            }
        }
    }
    if let Some(task) = queue.get_mut(next_index) {
        task.state = TaskState::Running;
    }

    let prev_ptr: *mut Context = match *current {
        Some(index) => queue.context_ptr(index).expect("current task vanished from arena"),
        None => &mut *BOOTSTRAP_CONTEXT.lock() as *mut Context,
    };
    let next_ptr = queue.context_ptr(next_index).expect("next task vanished from arena");

    *current = Some(next_index);

    // SAFETY: both pointers address `Context`s owned by the fixed-capacity
    // arena (or the static bootstrap context), never reallocated or freed
    // while this switch is in flight. Neither lock is held past this point.
    drop(current);
    drop(queue);
    unsafe {
        super::task::switch_to(&mut *prev_ptr, &*next_ptr);
    }
}

/// Clears the timer's pending-reschedule flag and yields the CPU.
pub fn yield_now() {
    crate::timer::take_need_schedule();
    schedule();
}

/// Terminates the calling task and switches away. Never returns.
///
/// The caller's own `Task` -- including the stack this function is running
/// on -- cannot be freed before the switch away from it completes. It is
/// stashed in `ZOMBIE`, which frees whatever task occupied that slot on the
/// *previous* call (by then safely off-CPU).
pub fn exit(code: i32) -> ! {
    let mut queue = QUEUE.lock();
    let mut current = CURRENT.lock();

    let index = current.expect("exit called with no current task");
    if let Some(task) = queue.get_mut(index) {
        task.state = TaskState::Zombie;
        task.exit_code = code;
    }
    let zombie = queue.remove(index).expect("current task vanished from arena");

    let next_index = queue.head().expect("no task left to schedule after exit");
    let next_ptr = queue.context_ptr(next_index).expect("next task vanished from arena");
    if let Some(task) = queue.get_mut(next_index) {
        task.state = TaskState::Running;
    }
    *current = Some(next_index);

    drop(current);
    drop(queue);

    let prev_ptr = {
        let mut slot = ZOMBIE.lock();
        // Dropping the previous occupant here frees its stack; it is no
        // longer executing on it by the time this call is reached.
        *slot = Some(zombie);
        &mut slot.as_mut().unwrap().context as *mut Context
    };

    // SAFETY: `prev_ptr` addresses the zombie's context, which `ZOMBIE`
    // keeps alive; this task never runs again so `prev_ptr`'s contents are
    // never read back.
    unsafe {
        super::task::switch_to(&mut *prev_ptr, &*next_ptr);
    }
    unreachable!("a task that called exit cannot be switched back to");
}

static ZOMBIE: Mutex<Option<Task>> = Mutex::new(None);

/// Removes `pid` from the ready list, refusing to kill the caller.
pub fn kill(pid: u64) -> Result<(), KernelError> {
    let mut queue = QUEUE.lock();
    let current = CURRENT.lock();

    if let Some(index) = *current {
        if queue.get(index).map(|t| t.pid) == Some(pid) {
            return Err(KernelError::CannotKillSelf);
        }
    }

    let index = queue
        .find_index_by_pid(pid)
        .ok_or(KernelError::NoSuchTask { pid })?;
    queue.remove(index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn dummy_entry() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn reset() {
        let mut queue = QUEUE.lock();
        *queue = ReadyQueue::new();
        queue.init();
        *CURRENT.lock() = None;
        *NEXT_PID.lock() = 1;
        *ZOMBIE.lock() = None;
    }

    #[test]
    fn create_assigns_increasing_pids() {
        reset();
        let a = create(dummy_entry, "a").unwrap();
        let b = create(dummy_entry, "b").unwrap();
        assert!(b > a);
    }

    #[test]
    fn kill_refuses_current_task() {
        reset();
        let pid = create(dummy_entry, "solo").unwrap();
        schedule();
        assert_eq!(current_pid(), Some(pid));
        assert_eq!(kill(pid), Err(KernelError::CannotKillSelf));
    }

    #[test]
    fn kill_unknown_pid_reports_no_such_task() {
        reset();
        create(dummy_entry, "a").unwrap();
        assert_eq!(kill(404), Err(KernelError::NoSuchTask { pid: 404 }));
    }
}
