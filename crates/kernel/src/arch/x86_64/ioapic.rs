//! I/O APIC driver and legacy PIC masking.

use spin::{Mutex, Once};
use x86_64::{VirtAddr, instructions::port::Port};

const IOREGSEL: u64 = 0x00;
const IOWIN: u64 = 0x10;

const REG_VERSION: u32 = 0x01;
const REG_REDIRECTION_BASE: u32 = 0x10;

const ENTRY_MASKED: u64 = 1 << 16;
const ENTRY_LEVEL_TRIGGERED: u64 = 1 << 15;
const ENTRY_ACTIVE_LOW: u64 = 1 << 13;
const ENTRY_DESTINATION_SHIFT: u64 = 56;

const PIC1_DATA: u16 = 0x21;
const PIC2_DATA: u16 = 0xA1;

/// Size of the register window.
pub const REGISTER_WINDOW: usize = 0x1000;

static IO_APIC: Once<IoApic> = Once::new();

/// One redirection-table entry, delivered in fixed mode to a physical destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirection {
    pub vector: u8,
    pub destination: u32,
    pub active_low: bool,
    pub level_triggered: bool,
    pub masked: bool,
}

impl Redirection {
    pub fn encode(&self) -> u64 {
        let mut value = self.vector as u64;
        if self.active_low {
            value |= ENTRY_ACTIVE_LOW;
        }
        if self.level_triggered {
            value |= ENTRY_LEVEL_TRIGGERED;
        }
        if self.masked {
            value |= ENTRY_MASKED;
        }
        value | ((self.destination as u64 & 0xFF) << ENTRY_DESTINATION_SHIFT)
    }
}

pub struct IoApic {
    id: u8,
    gsi_base: u32,
    // IOREGSEL and IOWIN must be used as a pair.
    window: Mutex<VirtAddr>,
}

impl IoApic {
    fn read(window: VirtAddr, register: u32) -> u32 {
        // SAFETY: `window` maps the register window; both registers are 32-bit.
        unsafe {
            (window + IOREGSEL).as_mut_ptr::<u32>().write_volatile(register);
            (window + IOWIN).as_ptr::<u32>().read_volatile()
        }
    }

    fn write(window: VirtAddr, register: u32, value: u32) {
        // SAFETY: see `read`.
        unsafe {
            (window + IOREGSEL).as_mut_ptr::<u32>().write_volatile(register);
            (window + IOWIN).as_mut_ptr::<u32>().write_volatile(value);
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn gsi_base(&self) -> u32 {
        self.gsi_base
    }

    pub fn redirection_entries(&self) -> u32 {
        let window = self.window.lock();
        ((Self::read(*window, REG_VERSION) >> 16) & 0xFF) + 1
    }

    /// Whether `gsi` is served by this controller.
    pub fn handles(&self, gsi: u32) -> bool {
        gsi >= self.gsi_base && gsi - self.gsi_base < self.redirection_entries()
    }

    fn set_entry(&self, index: u32, value: u64) {
        let window = self.window.lock();
        let register = REG_REDIRECTION_BASE + index * 2;
        // Masked low half first so a half-written entry never fires.
        Self::write(*window, register, (value as u32) | ENTRY_MASKED as u32);
        Self::write(*window, register + 1, (value >> 32) as u32);
        Self::write(*window, register, value as u32);
    }

    pub fn mask_all(&self) {
        for index in 0..self.redirection_entries() {
            self.set_entry(index, ENTRY_MASKED);
        }
    }

    /// Programs the entry for `gsi`. Returns `false` if this controller does not serve it.
    pub fn route(&self, gsi: u32, redirection: Redirection) -> bool {
        if !self.handles(gsi) {
            return false;
        }
        self.set_entry(gsi - self.gsi_base, redirection.encode());
        true
    }
}

/// Records the mapped controller.
///
/// # Safety
/// `base` must map the I/O APIC registers, uncached, for the life of the kernel.
pub unsafe fn init(base: VirtAddr, id: u8, gsi_base: u32) -> &'static IoApic {
    IO_APIC.call_once(|| IoApic {
        id,
        gsi_base,
        window: Mutex::new(base),
    })
}

pub fn get() -> Option<&'static IoApic> {
    IO_APIC.get()
}

/// Masks every line of both 8259 PICs so they never deliver alongside the I/O APIC.
pub fn mask_legacy_pics() {
    // SAFETY: writing the PIC data ports only changes their interrupt masks.
    unsafe {
        Port::<u8>::new(PIC1_DATA).write(0xFF);
        Port::<u8>::new(PIC2_DATA).write(0xFF);
    }
}
