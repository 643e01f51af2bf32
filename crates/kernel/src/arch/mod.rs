#[cfg(target_arch = "x86_64")]
pub(crate) mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use x86_64::*;

/// Idles the calling core forever, waking only to service interrupts.
pub fn park() -> ! {
    use core::arch::asm;

    loop {
        unsafe {
            #[cfg(target_arch = "x86_64")]
            asm!("hlt");
        }
    }
}

/// Clears interrupts on the calling core and halts it for good.
pub fn cpu_shutdown() -> ! {
    disable_interrupts();
    park()
}
