pub mod apic;
pub mod gdt;
pub mod interrupts;
pub mod ioapic;
pub mod pit;
pub mod ps2;

pub use interrupts::{InterruptState, InterruptVector};

/// The architecture-specific entry point named in the linker script.
#[unsafe(no_mangle)]
pub extern "C" fn kenter() -> ! {
    crate::kernel_main()
}

pub fn enable_interrupts() {
    x86_64::instructions::interrupts::enable();
}

pub fn disable_interrupts() {
    x86_64::instructions::interrupts::disable();
}

pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(f)
}

/// LAPIC id of the calling core, as reported by CPUID.
pub fn current_lapic_id() -> u32 {
    // SAFETY: leaf 1 is available on every x86_64 processor.
    #[allow(unused_unsafe)]
    let info = unsafe { core::arch::x86_64::__cpuid(1) };
    info.ebx >> 24
}
