#![cfg_attr(not(test), no_std)]
#![cfg_attr(target_arch = "x86_64", feature(abi_x86_interrupt))]

extern crate alloc;

mod acpi;
mod arch;
mod console;
mod framebuffer;
mod interrupts;
mod mem;
mod panic;
mod platform;
mod serial;
mod smp;

use bringup::CoreId;
use limine::BaseRevision;

pub use panic::handle_panic;

#[used]
#[unsafe(link_section = ".requests")]
static BASE_REVISION: BaseRevision = BaseRevision::with_revision(4);

/// Frequency of the primary's periodic local timer.
pub const TIMER_HZ: u32 = 100;

pub fn kernel_main() -> ! {
    assert!(BASE_REVISION.is_supported());

    let console = console::Console::init();
    serial::init(console);
    framebuffer::init(console);
    log::info!("ignition {}", env!("CARGO_PKG_VERSION"));

    let orchestrator = smp::bringup();
    if let Err(error) = orchestrator.initialize_primary() {
        orchestrator.halt(CoreId::PRIMARY, &error);
    }

    let report = match orchestrator.setup_all_cpus() {
        Ok(report) => report,
        Err(error) => orchestrator.halt(CoreId::PRIMARY, &error),
    };
    log::info!(
        "bring-up complete: {} cores, {} dispatched",
        report.cores,
        report.dispatched
    );

    if let Err(error) = orchestrator.start_local_timer(CoreId::PRIMARY, TIMER_HZ) {
        orchestrator.halt(CoreId::PRIMARY, &error);
    }

    mem::log_usage();
    log::debug!(
        "primary idle; {} spurious interrupts so far",
        interrupts::spurious_interrupts()
    );
    arch::park()
}
