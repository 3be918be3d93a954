//! Scheduler integration test: boots a real image, brings memory
//! management and the task subsystem up the way `bootstrap::kmain` does,
//! and exercises `create`/`schedule`/`yield_now`/`kill` end to end.
//!
//! The assertions run from inside a dedicated "driver" task rather than
//! from this file's own `_start`/`run` trampoline: the first `schedule()`
//! call from a non-task caller is a one-way jump into the ready list with
//! nothing left to switch back to, so code placed after it in `run` would
//! never execute.

#![no_std]
#![no_main]

use core::{
    arch::naked_asm,
    panic::PanicInfo,
    sync::atomic::{AtomicU64, Ordering},
};

use nimbus_kernel::{
    arch::x86_64::multiboot::{self, BootInfo},
    error::KernelError,
    exit_qemu, kernel_assert, kernel_assert_eq, mm, sched, serial_println, test_panic_handler,
    QemuExitCode,
};

const STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct Stack([u8; STACK_SIZE]);
static mut STACK: Stack = Stack([0; STACK_SIZE]);

#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _start() -> ! {
    naked_asm!(
        "lea rsp, [{stack} + {stack_size}]",
        "call {entry}",
        stack = sym STACK,
        stack_size = const STACK_SIZE,
        entry = sym run,
    );
}

/// Pid of the driver task, published before the ready list starts
/// scheduling so `driver_task` (a plain `extern "C" fn() -> !` with no
/// arguments of its own) can read it back.
static DRIVER_PID: AtomicU64 = AtomicU64::new(0);

/// Cooperative ring member: yields forever, keeping the round-robin moving
/// so the driver task eventually gets scheduled back in.
extern "C" fn ring_task() -> ! {
    loop {
        sched::yield_now();
    }
}

extern "C" fn driver_task() -> ! {
    let driver_pid = DRIVER_PID.load(Ordering::Acquire);

    test_schedule_round_robins(driver_pid);
    test_kill_refuses_current_and_removes_others();

    serial_println!("All scheduler tests passed!");
    exit_qemu(QemuExitCode::Success)
}

extern "C" fn run(magic: u32, info_phys: u64) -> ! {
    serial_println!("Starting scheduler tests...");
    kernel_assert!(magic == multiboot::MULTIBOOT2_MAGIC);

    mm::page_table::init();
    // SAFETY: page_table::init just confirmed the higher-half window is
    // live, which from_phys needs to read the boot info.
    let boot_info = unsafe { BootInfo::from_phys(info_phys) };
    let total_ram: u64 = boot_info
        .memory_map()
        .filter(|e| e.is_available())
        .map(|e| e.base_addr + e.length)
        .max()
        .unwrap_or(0);
    mm::PMM.init(0, total_ram as usize);
    for entry in boot_info.memory_map().filter(|e| e.is_available()) {
        let mut frame = entry.base_addr & !(mm::FRAME_SIZE as u64 - 1);
        let end = entry.base_addr + entry.length;
        while frame + mm::FRAME_SIZE as u64 <= end {
            mm::PMM.mark_free(mm::PhysicalAddress::new(frame));
            frame += mm::FRAME_SIZE as u64;
        }
    }
    mm::heap::HEAP.init();

    sched::init();

    test_create_assigns_pids();

    let driver_pid = sched::create(driver_task, "driver").expect("create should succeed");
    DRIVER_PID.store(driver_pid, Ordering::Release);
    sched::create(ring_task, "ring-a").expect("create should succeed");
    sched::create(ring_task, "ring-b").expect("create should succeed");

    serial_println!("entering scheduler");
    sched::schedule();

    // Unreachable once the driver task's exit_qemu fires; kept only as a
    // safety net in case scheduling never picks up (e.g. an empty ready
    // list), so this context parks instead of running off the end.
    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

fn test_create_assigns_pids() {
    let a = sched::create(ring_task, "probe-a").expect("create should succeed");
    let b = sched::create(ring_task, "probe-b").expect("create should succeed");
    kernel_assert!(b != a);
    sched::kill(a).expect("kill should remove the probe task");
    sched::kill(b).expect("kill should remove the probe task");
}

/// Yielding once from the driver task should eventually return here after a
/// full lap of the ready ring (driver -> ring-a -> ring-b -> driver), since
/// both ring members just keep yielding.
fn test_schedule_round_robins(driver_pid: u64) {
    kernel_assert_eq!(sched::current_pid(), Some(driver_pid));
    sched::yield_now();
    kernel_assert_eq!(sched::current_pid(), Some(driver_pid));
}

fn test_kill_refuses_current_and_removes_others() {
    let current = sched::current_pid().expect("a task should be running by now");
    kernel_assert_eq!(sched::kill(current), Err(KernelError::CannotKillSelf));

    let other = sched::create(ring_task, "killable").expect("create should succeed");
    kernel_assert!(sched::kill(other).is_ok());
    kernel_assert_eq!(sched::kill(other), Err(KernelError::NoSuchTask { pid: other }));
}
