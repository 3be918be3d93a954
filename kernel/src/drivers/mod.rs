//! Device drivers.
//!
//! The only device this core talks to directly is the PS/2 keyboard; the
//! VGA text console and anything richer is an external collaborator
//! reached only through the serial port in [`crate::arch::x86_64::serial`].

pub mod keyboard;

pub fn init() {
    keyboard::init();
}
