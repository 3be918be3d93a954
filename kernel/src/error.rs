//! Kernel error types.
//!
//! Internal helpers thread these through `Result<T, KernelError>` and `?`;
//! the few functions that sit on a public boundary (scheduler `create`,
//! `kill`, syscall-shaped entry points) adapt to a nullable-pointer or
//! status-code contract at that single call site, rather than leaking
//! `Result` across it.

use core::fmt;

/// Kernel-internal error type. Deliberately small: this core only has four
/// subsystems that can fail, so a single flat enum (rather than the nested
/// per-subsystem sub-enums a larger kernel would want) keeps call sites
/// readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// The PMM or VMM had no frames/range left to satisfy a request.
    OutOfMemory,
    /// A virtual address had no mapping at the point it was queried.
    NotMapped,
    /// A subsystem was used before its `init` ran.
    NotInitialized,
    /// An IRQ line or vector number outside the range this core handles.
    InvalidIrq { irq: u8 },
    /// `kill` was asked to operate on a pid with no matching task.
    NoSuchTask { pid: u64 },
    /// `kill` targeted the caller itself, which it refuses to do.
    CannotKillSelf,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::NotMapped => write!(f, "address not mapped"),
            KernelError::NotInitialized => write!(f, "subsystem not initialized"),
            KernelError::InvalidIrq { irq } => write!(f, "invalid IRQ line {irq}"),
            KernelError::NoSuchTask { pid } => write!(f, "no task with pid {pid}"),
            KernelError::CannotKillSelf => write!(f, "a task cannot kill itself"),
        }
    }
}

impl From<crate::mm::MemoryError> for KernelError {
    fn from(e: crate::mm::MemoryError) -> Self {
        match e {
            crate::mm::MemoryError::OutOfMemory => KernelError::OutOfMemory,
            crate::mm::MemoryError::NotMapped => KernelError::NotMapped,
            crate::mm::MemoryError::NotInitialized => KernelError::NotInitialized,
        }
    }
}
