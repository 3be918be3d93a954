//! x86_64 architecture support: GDT, IDT, the 8259 PIC, serial I/O, the
//! PIT-driven timer, and the Multiboot2 boot path.

pub mod boot;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod multiboot;
pub mod pic;
pub mod serial;
pub mod timer;

/// Disables interrupts, brings up the GDT/IDT, and initializes the PIC with
/// every line masked. Paging, PMM, VMM, and the heap are brought up
/// separately by the boot orchestrator, which needs the Multiboot2 memory
/// map first.
pub fn init() {
    x86_64::instructions::interrupts::disable();

    gdt::init();
    idt::init();
    pic::init();

    crate::println!("[ARCH] GDT, IDT, and PIC initialized (interrupts masked)");
}

/// Halts until the next interrupt, once. Used by the idle task and the
/// boot orchestrator's main loop, which must keep checking the
/// reschedule flag rather than halting forever.
pub fn halt() {
    x86_64::instructions::hlt();
}

/// Basic port I/O, used by the PIC and keyboard drivers.
#[allow(dead_code)]
pub unsafe fn outb(port: u16, value: u8) {
    // SAFETY: caller guarantees `port` is a valid, intended I/O port.
    unsafe {
        x86_64::instructions::port::Port::new(port).write(value);
    }
}

#[allow(dead_code)]
pub unsafe fn inb(port: u16) -> u8 {
    // SAFETY: caller guarantees `port` is a valid, intended I/O port.
    unsafe { x86_64::instructions::port::Port::new(port).read() }
}
