//! Limine MP glue: the core list, the secondary entry routine and the orchestrator.

use bringup::{BootCore, BringUp, Topology};
use limine::{mp::Cpu, request::MpRequest};
use spin::Once;

use crate::{arch, platform::HardwarePlatform};

#[used]
#[unsafe(link_section = ".requests")]
static MP_REQUEST: MpRequest = MpRequest::new();

/// Secondaries only receive their `Cpu`, so the orchestrator has to be reachable from
/// a static.
static BRINGUP: Once<BringUp<HardwarePlatform>> = Once::new();

pub type SecondaryEntry = unsafe extern "C" fn(&Cpu) -> !;

pub fn bringup() -> &'static BringUp<HardwarePlatform> {
    BRINGUP.call_once(|| BringUp::new(HardwarePlatform))
}

/// A core parked by Limine, waiting for its `goto_address`.
pub struct LimineCore(&'static Cpu);

// SAFETY: the bootloader's per-core record is only read, apart from the single atomic
// `goto_address` write that releases the core.
unsafe impl Send for LimineCore {}
unsafe impl Sync for LimineCore {}

impl BootCore for LimineCore {
    type Entry = SecondaryEntry;

    fn lapic_id(&self) -> u32 {
        self.0.lapic_id
    }

    fn dispatch(&self, entry: SecondaryEntry) {
        self.0.goto_address.write(entry);
    }
}

/// The cores Limine started, primary first. `None` when the MP request went unanswered.
pub fn capture_topology() -> Option<Topology<LimineCore>> {
    let response = MP_REQUEST.get_response()?;
    let cores = response.cpus().iter().map(|&cpu| LimineCore(cpu));
    Some(Topology::new(cores, response.bsp_lapic_id()))
}

/// Where every secondary lands once dispatched.
///
/// # Safety
/// Only Limine may call this, on a core released through [`BootCore::dispatch`].
pub unsafe extern "C" fn secondary_entry(cpu: &Cpu) -> ! {
    let Some(orchestrator) = BRINGUP.get() else {
        arch::cpu_shutdown();
    };

    match orchestrator.run_secondary(cpu.lapic_id) {
        Ok(_) => arch::park(),
        Err(error) => match orchestrator.topology().and_then(|t| t.find(cpu.lapic_id)) {
            Some(core) => orchestrator.halt(core, &error),
            None => {
                log::error!("LAPIC id {}: bring-up failed: {}", cpu.lapic_id, error);
                bringup::shutdown(orchestrator.platform())
            }
        },
    }
}
