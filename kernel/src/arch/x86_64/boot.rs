//! Kernel entry trampoline.
//!
//! The Multiboot2 loader only guarantees 32-bit protected mode; getting from
//! there into 64-bit long mode with a higher-half mapping active is out of
//! scope for this module -- it is assumed to have already run by the time
//! `_start` gets control, leaving the Multiboot2 magic in `edi` and the
//! boot info physical address in `esi` per the System V entry convention
//! `kmain` expects.

use core::arch::naked_asm;

/// Size of the static boot stack `_start` switches onto before calling
/// `kmain`. 16-byte aligned per the x86_64 ABI.
const BOOT_STACK_SIZE: usize = 64 * 1024;

#[repr(align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

static mut BOOT_STACK: BootStack = BootStack([0; BOOT_STACK_SIZE]);

/// Linker entry point. Switches to a known-good stack and falls into
/// `kmain(magic, multiboot_info_phys)`.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn _start() -> ! {
    naked_asm!(
        "lea rsp, [{stack} + {stack_size}]",
        "call {kmain}",
        stack = sym BOOT_STACK,
        stack_size = const BOOT_STACK_SIZE,
        kmain = sym crate::bootstrap::kmain,
    );
}
