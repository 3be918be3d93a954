//! Cooperative, preemptible round-robin task scheduling.
//!
//! A task is a kernel stack plus a saved stack pointer (`task::Context`),
//! held in a fixed-capacity arena (`queue::ReadyQueue`) so the raw pointers
//! `task::switch_to` needs stay valid across however long a task sits
//! suspended. `scheduler` drives the two (`QUEUE`, `CURRENT`) locks that
//! guard all of it.

mod queue;
mod scheduler;
mod task;

pub use queue::MAX_TASKS;
pub use scheduler::{create, current_pid, exit, kill, schedule, yield_now};
pub use task::TaskState;

pub fn init() {
    scheduler::init();
}
