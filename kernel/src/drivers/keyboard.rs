//! PS/2 keyboard driver.
//!
//! Scan codes are decoded by the `pc-keyboard` crate (`ScancodeSet1`,
//! `layouts::Us104Key`), but the result is deposited into a single-slot
//! mailbox with a small sentinel encoding for non-printable keys, not the
//! richer ring buffer the decode crate's consumers usually expect.
//!
//! Every scan code, including the shift make/break codes, is forwarded to
//! `Keyboard::add_byte`/`process_keyevent`: the crate only updates its own
//! modifier state when a key event actually passes through
//! `process_keyevent`, so intercepting shift codes before that point would
//! leave both our own and the crate's shift tracking permanently stuck.

use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use pc_keyboard::{layouts, DecodedKey, HandleControl, KeyCode, KeyState, Keyboard, ScancodeSet1};
use spin::Mutex;
use x86_64::instructions::port::Port;

/// Empty-slot sentinel.
pub const MAILBOX_EMPTY: i32 = 0;
/// Left arrow sentinel.
pub const KEY_LEFT: i32 = -1;
/// Right arrow sentinel.
pub const KEY_RIGHT: i32 = -2;
/// Backspace sentinel.
pub const KEY_BACKSPACE: i32 = 8;
/// Newline sentinel.
pub const KEY_NEWLINE: i32 = 10;

/// Raw Set-1 make/break codes for the dedicated arrow keys. `ScancodeSet1`
/// only maps these to `ArrowLeft`/`ArrowRight` when they arrive behind an
/// `0xE0` extended prefix; the bare bytes decode as the numpad 4/6 digits
/// instead, so they're matched directly off the raw byte rather than
/// through `pc-keyboard`'s decode table.
const SCANCODE_ARROW_LEFT_MAKE: u8 = 0x4B;
const SCANCODE_ARROW_LEFT_BREAK: u8 = 0xCB;
const SCANCODE_ARROW_RIGHT_MAKE: u8 = 0x4D;
const SCANCODE_ARROW_RIGHT_BREAK: u8 = 0xCD;

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static READY: AtomicBool = AtomicBool::new(false);
static SHIFT_PRESSED: AtomicBool = AtomicBool::new(false);

/// One-slot mailbox. `MAILBOX_EMPTY` means no pending key.
static MAILBOX: AtomicI32 = AtomicI32::new(MAILBOX_EMPTY);

static KEYBOARD: Mutex<Option<Keyboard<layouts::Us104Key, ScancodeSet1>>> = Mutex::new(None);

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Marks the keyboard ready to deposit into the mailbox. Scancodes that
/// arrive before this is set (e.g. during boot) are decoded for shift
/// tracking but never deposited.
pub fn set_ready(ready: bool) {
    READY.store(ready, Ordering::Release);
}

pub fn init() {
    let kb = Keyboard::new(
        ScancodeSet1::new(),
        layouts::Us104Key,
        HandleControl::MapLettersToUnicode,
    );
    *KEYBOARD.lock() = Some(kb);
    INITIALIZED.store(true, Ordering::Release);
}

/// Reads the status/scan-code port and decodes the key. Every scancode --
/// including the shift make/break codes (0x2A/0x36 press, 0xAA/0xB6
/// release) -- is forwarded to `decode`, which both mirrors shift state
/// into `SHIFT_PRESSED` and lets `pc-keyboard`'s own modifier tracking see
/// it. Deposits into the mailbox on a key-down iff the slot is empty and
/// the system is marked ready. Sends EOI on exit.
pub fn handle_interrupt() {
    // SAFETY: port 0x60 is the PS/2 data port; reading it here is the
    // standard IRQ1 acknowledgment sequence.
    let scancode = unsafe { Port::<u8>::new(0x60).read() };

    decode(scancode);

    crate::arch::x86_64::pic::end_of_interrupt(1);
}

fn decode(scancode: u8) {
    match scancode {
        SCANCODE_ARROW_LEFT_MAKE => return deposit(KEY_LEFT),
        SCANCODE_ARROW_RIGHT_MAKE => return deposit(KEY_RIGHT),
        SCANCODE_ARROW_LEFT_BREAK | SCANCODE_ARROW_RIGHT_BREAK => return,
        _ => {}
    }

    let mut guard = KEYBOARD.lock();
    let Some(keyboard) = guard.as_mut() else {
        return;
    };
    let Ok(Some(event)) = keyboard.add_byte(scancode) else {
        return;
    };

    if matches!(event.code, KeyCode::LShift | KeyCode::RShift) {
        SHIFT_PRESSED.store(event.state == KeyState::Down, Ordering::Relaxed);
    }

    if event.state != KeyState::Down {
        return;
    }
    let code = event.code;
    let sentinel = match code {
        KeyCode::ArrowLeft => Some(KEY_LEFT),
        KeyCode::ArrowRight => Some(KEY_RIGHT),
        KeyCode::Backspace => Some(KEY_BACKSPACE),
        KeyCode::Return => Some(KEY_NEWLINE),
        _ => keyboard.process_keyevent(event).and_then(|key| match key {
            DecodedKey::Unicode(ch) if ch.is_ascii() && ch != '\0' => Some(ch as i32),
            _ => None,
        }),
    };

    if let Some(value) = sentinel {
        deposit(value);
    }
}

fn deposit(value: i32) {
    if !READY.load(Ordering::Acquire) {
        return;
    }
    let _ = MAILBOX.compare_exchange(
        MAILBOX_EMPTY,
        value,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
}

/// Polls the mailbox, returning and clearing any pending key.
pub fn poll() -> Option<i32> {
    let value = MAILBOX.swap(MAILBOX_EMPTY, Ordering::AcqRel);
    if value == MAILBOX_EMPTY {
        None
    } else {
        Some(value)
    }
}

pub fn shift_pressed() -> bool {
    SHIFT_PRESSED.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_rejects_deposit_until_ready() {
        MAILBOX.store(MAILBOX_EMPTY, Ordering::Relaxed);
        READY.store(false, Ordering::Relaxed);
        deposit(65);
        assert_eq!(poll(), None);

        READY.store(true, Ordering::Relaxed);
        deposit(65);
        assert_eq!(poll(), Some(65));
        assert_eq!(poll(), None);
    }

    #[test]
    fn mailbox_drops_when_full() {
        MAILBOX.store(MAILBOX_EMPTY, Ordering::Relaxed);
        READY.store(true, Ordering::Relaxed);
        deposit(1);
        deposit(2);
        assert_eq!(poll(), Some(1));
    }

    #[test]
    fn bare_arrow_scancodes_produce_sentinels() {
        *KEYBOARD.lock() = Some(Keyboard::new(
            ScancodeSet1::new(),
            layouts::Us104Key,
            HandleControl::MapLettersToUnicode,
        ));
        MAILBOX.store(MAILBOX_EMPTY, Ordering::Relaxed);
        READY.store(true, Ordering::Relaxed);

        decode(0x4B);
        assert_eq!(poll(), Some(KEY_LEFT));
        decode(0xCB);
        assert_eq!(poll(), None);

        decode(0x4D);
        assert_eq!(poll(), Some(KEY_RIGHT));
        decode(0xCD);
        assert_eq!(poll(), None);
    }

    #[test]
    fn shift_forces_uppercase_then_releases() {
        *KEYBOARD.lock() = Some(Keyboard::new(
            ScancodeSet1::new(),
            layouts::Us104Key,
            HandleControl::MapLettersToUnicode,
        ));
        MAILBOX.store(MAILBOX_EMPTY, Ordering::Relaxed);
        READY.store(true, Ordering::Relaxed);
        SHIFT_PRESSED.store(false, Ordering::Relaxed);

        decode(0x2A); // left shift down
        decode(0x1E); // 'a' key down, shifted
        assert_eq!(poll(), Some('A' as i32));
        assert!(shift_pressed());

        decode(0xAA); // left shift up
        decode(0x1E); // 'a' key down, unshifted
        assert_eq!(poll(), Some('a' as i32));
        assert!(!shift_pressed());
    }
}
