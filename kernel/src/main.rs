#![no_std]
#![no_main]

use core::panic::PanicInfo;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    nimbus_kernel::println!("[KERNEL PANIC] {}", info);
    nimbus_kernel::arch::halt_loop();
}

// `_start`/`kmain` live in the library (`arch::x86_64::boot`, `bootstrap`);
// this binary only needs to link against it to produce a bootable image.
#[allow(unused_imports)]
use nimbus_kernel as _;
