//! xAPIC local interrupt controller, accessed through its memory-mapped registers.

use spin::Once;
use x86_64::{VirtAddr, registers::model_specific::Msr};

use super::InterruptVector;

const IA32_APIC_BASE: u32 = 0x1B;
const APIC_BASE_ENABLE: u64 = 1 << 11;
const APIC_BASE_ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

const REG_ID: usize = 0x020;
const REG_TPR: usize = 0x080;
const REG_EOI: usize = 0x0B0;
const REG_SVR: usize = 0x0F0;
const REG_ESR: usize = 0x280;
const REG_LVT_TIMER: usize = 0x320;
const REG_LVT_LINT0: usize = 0x350;
const REG_LVT_LINT1: usize = 0x360;
const REG_LVT_ERROR: usize = 0x370;
const REG_TIMER_INITIAL: usize = 0x380;
const REG_TIMER_CURRENT: usize = 0x390;
const REG_TIMER_DIVIDE: usize = 0x3E0;

const SVR_SOFTWARE_ENABLE: u32 = 1 << 8;
const LVT_MASKED: u32 = 1 << 16;
const LVT_TIMER_PERIODIC: u32 = 1 << 17;

/// Divide configuration encoding for divide-by-16.
pub const TIMER_DIVIDE_16: u8 = 0x03;

/// Size of the register window.
pub const REGISTER_WINDOW: usize = 0x1000;

static LOCAL_APIC: Once<LocalApic> = Once::new();

pub struct LocalApic {
    base: VirtAddr,
}

impl LocalApic {
    fn read(&self, register: usize) -> u32 {
        // SAFETY: `base` maps the register window, and registers are 32-bit aligned.
        unsafe { (self.base + register as u64).as_ptr::<u32>().read_volatile() }
    }

    fn write(&self, register: usize, value: u32) {
        // SAFETY: see `read`.
        unsafe {
            (self.base + register as u64)
                .as_mut_ptr::<u32>()
                .write_volatile(value)
        }
    }

    pub fn id(&self) -> u32 {
        self.read(REG_ID) >> 24
    }

    /// Enables the calling core's controller with its timer masked.
    ///
    /// Secondaries also mask LINT0, LINT1 and the error vector; on the primary these are
    /// left as firmware configured them.
    pub fn enable(&self, primary: bool) {
        // SAFETY: IA32_APIC_BASE exists on every processor with a local APIC, and setting
        // the enable bit keeps the base address unchanged.
        unsafe {
            let mut msr = Msr::new(IA32_APIC_BASE);
            let value = msr.read();
            msr.write(value | APIC_BASE_ENABLE);
        }

        // The error status register latches on write; clear it twice.
        self.write(REG_ESR, 0);
        self.write(REG_ESR, 0);
        self.write(REG_TPR, 0);
        self.write(
            REG_SVR,
            SVR_SOFTWARE_ENABLE | InterruptVector::SPURIOUS.value() as u32,
        );
        self.mask_timer();

        if !primary {
            self.write(REG_LVT_LINT0, LVT_MASKED);
            self.write(REG_LVT_LINT1, LVT_MASKED);
            self.write(REG_LVT_ERROR, LVT_MASKED);
        }
    }

    pub fn end_of_interrupt(&self) {
        self.write(REG_EOI, 0);
    }

    pub fn mask_timer(&self) {
        self.write(
            REG_LVT_TIMER,
            LVT_MASKED | InterruptVector::LOCAL_TIMER.value() as u32,
        );
    }

    /// Starts a masked one-shot countdown from `u32::MAX` for measurement.
    pub fn start_countdown(&self, divider: u8) {
        self.mask_timer();
        self.write(REG_TIMER_DIVIDE, divider as u32);
        self.write(REG_TIMER_INITIAL, u32::MAX);
    }

    pub fn current_count(&self) -> u32 {
        self.read(REG_TIMER_CURRENT)
    }

    pub fn stop_timer(&self) {
        self.write(REG_TIMER_INITIAL, 0);
    }

    /// Starts the periodic timer, delivering [`InterruptVector::LOCAL_TIMER`].
    pub fn start_periodic(&self, divider: u8, initial_count: u32) {
        self.write(REG_TIMER_DIVIDE, divider as u32);
        self.write(
            REG_LVT_TIMER,
            LVT_TIMER_PERIODIC | InterruptVector::LOCAL_TIMER.value() as u32,
        );
        self.write(REG_TIMER_INITIAL, initial_count);
    }
}

/// Physical address of the register window, as programmed in IA32_APIC_BASE.
pub fn physical_base() -> u64 {
    // SAFETY: reading IA32_APIC_BASE has no side effects.
    let value = unsafe { Msr::new(IA32_APIC_BASE).read() };
    value & APIC_BASE_ADDRESS_MASK
}

/// Records the mapped register window. Every core shares the same window.
///
/// # Safety
/// `base` must map the local APIC registers, uncached, for the life of the kernel.
pub unsafe fn init(base: VirtAddr) -> &'static LocalApic {
    LOCAL_APIC.call_once(|| LocalApic { base })
}

pub fn get() -> Option<&'static LocalApic> {
    LOCAL_APIC.get()
}

/// Acknowledges the interrupt being serviced on the calling core.
pub fn end_of_interrupt() {
    if let Some(lapic) = get() {
        lapic.end_of_interrupt();
    }
}
