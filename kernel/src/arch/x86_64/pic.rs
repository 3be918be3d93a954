//! 8259 PIC remap, masking, and end-of-interrupt, routed entirely through
//! the `pic8259` crate's `ChainedPics`.
//!
//! Every PIC access -- init, per-line mask, EOI -- goes through one
//! `spin::Mutex<ChainedPics>`; there is no second, hand-rolled path that
//! could drift out of sync with it.

use pic8259::ChainedPics;
use spin::Mutex;

/// Master PIC vector offset: IRQ0..7 deliver at 0x20..0x27.
pub const PIC_1_OFFSET: u8 = 0x20;
/// Slave PIC vector offset: IRQ8..15 deliver at 0x28..0x2F.
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

/// Timer interrupt vector (IRQ0).
pub const TIMER_VECTOR: u8 = PIC_1_OFFSET;
/// Keyboard interrupt vector (IRQ1).
pub const KEYBOARD_VECTOR: u8 = PIC_1_OFFSET + 1;

static PICS: Mutex<ChainedPics> =
    // SAFETY: offsets don't overlap any CPU exception vector (0..=31) and
    // the two PICs occupy the standard 0x20-0x21 / 0xA0-0xA1 port pairs.
    unsafe { Mutex::new(ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET)) };

/// Remaps both PICs to [`PIC_1_OFFSET`]/[`PIC_2_OFFSET`] and masks every
/// line.
pub fn init() {
    // SAFETY: runs once during single-threaded boot, before interrupts are
    // enabled.
    unsafe {
        PICS.lock().initialize();
    }
    mask_all();
    crate::println!(
        "[PIC] remapped to {:#x}..{:#x}, all lines masked",
        PIC_1_OFFSET,
        PIC_2_OFFSET + 7
    );
}

fn mask_all() {
    // SAFETY: writes to the two PICs' data ports, a normal masked-boot
    // state.
    unsafe {
        PICS.lock().write_masks(0xFF, 0xFF);
    }
}

/// Enables a single IRQ line (0..=15) by clearing its mask bit.
pub fn enable_irq(irq: u8) {
    let mut pics = PICS.lock();
    // SAFETY: `pics` owns the only handle to the PIC data ports; reading
    // then writing back the mask is race-free under the lock.
    unsafe {
        if irq < 8 {
            let mask = read_mask(0x21);
            pics.write_masks(mask & !(1 << irq), read_mask(0xA1));
        } else {
            let mask = read_mask(0xA1);
            pics.write_masks(read_mask(0x21), mask & !(1 << (irq - 8)));
        }
    }
}

unsafe fn read_mask(port: u16) -> u8 {
    // SAFETY: caller holds `PICS`' lock.
    unsafe { x86_64::instructions::port::Port::<u8>::new(port).read() }
}

/// Sends EOI for `irq`; also notifies the slave PIC when `irq >= 8`.
pub fn end_of_interrupt(irq: u8) {
    // SAFETY: `irq` identifies a line this handler is actually servicing.
    unsafe {
        PICS.lock().notify_end_of_interrupt(PIC_1_OFFSET + irq);
    }
}
