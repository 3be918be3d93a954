//! The interrupt descriptor table and its ISR stubs.
//!
//! Every gate here is built through the `x86_64` crate's
//! `InterruptDescriptorTable`/`extern "x86-interrupt"`, which generates the
//! register save/restore and `iretq` sequence (and, for vectors with a CPU
//! error code, pulls it at the right stack offset) at compile time, so
//! there's no hand-rolled naked-function stub here.

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use crate::arch::x86_64::{gdt, pic};

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        // SAFETY: `DOUBLE_FAULT_IST_INDEX` names a stack the GDT's TSS
        // actually reserves, set up in `gdt::init` before this runs.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt[pic::TIMER_VECTOR as usize].set_handler_fn(timer_interrupt_handler);
        idt[pic::KEYBOARD_VECTOR as usize].set_handler_fn(keyboard_interrupt_handler);
        idt
    };
}

pub fn init() {
    IDT.load();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::println!("[IDT] breakpoint\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    crate::println!("[IDT] double fault\n{:#?}", stack_frame);
    crate::arch::halt_loop();
}

/// Logs and halts. Recovering from a page fault (demand paging, COW) is a
/// non-goal, so there's nothing to do here but stop.
extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    crate::println!(
        "[IDT] page fault at {:?}, error {:?}\n{:#?}",
        Cr2::read(),
        error_code,
        stack_frame
    );
    crate::arch::halt_loop();
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    crate::println!(
        "[IDT] general protection fault, error {:#x}\n{:#?}",
        error_code,
        stack_frame
    );
    crate::arch::halt_loop();
}

/// Generic line-IRQ stub for the timer: acknowledges and returns. Must not
/// acquire the task-subsystem locks; it only touches atomics via
/// `crate::arch::x86_64::timer::tick`.
extern "x86-interrupt" fn timer_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::arch::x86_64::timer::tick();
    pic::end_of_interrupt(0);
}

/// Calls the keyboard handler, which reads the scancode and sends its own
/// EOI.
extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    crate::drivers::keyboard::handle_interrupt();
}
