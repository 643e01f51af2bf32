//! PS/2 controller ports.

use x86_64::instructions::port::Port;

const DATA: u16 = 0x60;
const STATUS: u16 = 0x64;
const OUTPUT_FULL: u8 = 1 << 0;

/// Reads the data port once, so a byte latched before routing came up no longer holds
/// the line. Returns the byte if the controller flagged one as pending.
pub fn drain_pending() -> Option<u8> {
    // SAFETY: reading the status and data ports only consumes controller output.
    unsafe {
        let pending = Port::<u8>::new(STATUS).read() & OUTPUT_FULL != 0;
        let byte = Port::<u8>::new(DATA).read();
        pending.then_some(byte)
    }
}

/// Reads the scancode behind a keyboard interrupt.
pub fn read_scancode() -> u8 {
    // SAFETY: see `drain_pending`.
    unsafe { Port::<u8>::new(DATA).read() }
}
