//! PIT programming and the timer ISR's hardware-facing half.
//!
//! Frequency is fixed at [`TICK_HZ`] rather than configurable; nothing in
//! this core needs a different rate, and a fixed constant keeps the
//! divisor arithmetic exact.

use x86_64::instructions::port::Port;

const PIT_FREQUENCY: u32 = 1_193_182;
/// Fixed tick rate the PIT is programmed for.
pub const TICK_HZ: u32 = 100;

/// Programs PIT channel 0, rate generator mode, for [`TICK_HZ`] interrupts
/// per second.
pub fn init() {
    let divisor = (PIT_FREQUENCY / TICK_HZ) as u16;

    // SAFETY: ports 0x40/0x43 are the PIT's fixed command/channel-0 data
    // ports; this runs once during single-threaded boot before interrupts
    // are enabled.
    unsafe {
        let mut cmd: Port<u8> = Port::new(0x43);
        let mut data: Port<u8> = Port::new(0x40);

        cmd.write(0x36); // channel 0, lobyte/hibyte, rate generator
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }

    crate::println!("[TIMER] PIT programmed for {} Hz", TICK_HZ);
}

/// Called from the timer interrupt handler after EOI. Advances the shared
/// tick counter and preemption flag.
pub fn tick() {
    crate::timer::tick();
}
