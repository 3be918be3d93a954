//! `kmain`: the handoff point from boot assembly into Rust, and the boot
//! orchestration that brings every subsystem up in dependency order.
//!
//! Order matters: the frame allocator needs to know how much RAM exists
//! (from the Multiboot2 memory map) before anything can allocate; paging
//! needs the frame allocator to get page-table frames; the VMM and heap
//! need paging; everything after that needs the heap (`Vec`, `String` in
//! the task subsystem).

use crate::{
    arch::x86_64::{multiboot, pic, timer as arch_timer},
    mm::{self, heap, page_table, PhysicalAddress},
    sched,
};

/// First task's entry point: spins forever so there's always something
/// ready once preemption kicks in; real workloads would `sched::create`
/// more tasks from here.
extern "C" fn idle_task() -> ! {
    loop {
        crate::arch::x86_64::halt();
    }
}

/// Entry point called by the boot trampoline with the Multiboot2 magic and
/// boot information's physical address, per `arch::x86_64::boot::_start`'s
/// System V calling convention.
#[unsafe(no_mangle)]
pub extern "C" fn kmain(magic: u32, info_phys: u64) -> ! {
    crate::println!("[BOOT] nimbus-kernel v{}", env!("CARGO_PKG_VERSION"));

    if magic != multiboot::MULTIBOOT2_MAGIC {
        crate::println!("[BOOT] fatal: bad multiboot2 magic {:#x}", magic);
        crate::arch::halt_loop();
    }

    page_table::init();

    // SAFETY: paging::init just confirmed the higher-half identity window
    // is live, which is what from_phys needs to read the boot info safely.
    let boot_info = unsafe { multiboot::BootInfo::from_phys(info_phys) };

    let total_ram_bytes: u64 = boot_info
        .memory_map()
        .filter(|e| e.is_available())
        .map(|e| e.base_addr + e.length)
        .max()
        .unwrap_or(0);

    mm::PMM.init(0, total_ram_bytes as usize);
    for entry in boot_info.memory_map().filter(|e| e.is_available()) {
        let start = entry.base_addr;
        let end = entry.base_addr + entry.length;
        let mut frame = start & !(mm::FRAME_SIZE as u64 - 1);
        while frame + mm::FRAME_SIZE as u64 <= end {
            mm::PMM.mark_free(PhysicalAddress::new(frame));
            frame += mm::FRAME_SIZE as u64;
        }
    }

    heap::HEAP.init();
    crate::println!("[BOOT] heap online");

    crate::arch::x86_64::init();
    arch_timer::init();
    crate::drivers::init();

    pic::enable_irq(0);
    pic::enable_irq(1);

    sched::init();
    match sched::create(idle_task, "idle") {
        Some(pid) => crate::println!("[BOOT] first task created, pid {pid}"),
        None => {
            crate::println!("[BOOT] fatal: could not create the first task");
            crate::arch::halt_loop();
        }
    }

    crate::drivers::keyboard::set_ready(true);

    crate::println!("[BOOT] enabling interrupts, entering scheduler");
    x86_64::instructions::interrupts::enable();

    loop {
        if crate::timer::take_need_schedule() {
            sched::schedule();
        }
        crate::arch::x86_64::halt();
    }
}
