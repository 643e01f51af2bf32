use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

static PANICKING: AtomicBool = AtomicBool::new(false);

/// Logs the panic and stops the calling core.
///
/// A panic raised while another one is being reported stops the core silently, as the
/// console lock may be held by the first.
pub fn handle_panic(info: &core::panic::PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        arch::cpu_shutdown();
    }

    match info.location() {
        Some(location) => log::error!(
            "kernel panic at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        ),
        None => log::error!("kernel panic: {}", info.message()),
    }

    arch::cpu_shutdown()
}
