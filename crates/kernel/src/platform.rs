//! [`Platform`] on real hardware.

use bringup::{BringUpError, CoreId, LocalControllerState, Platform, TimerCalibration, Topology};
use pmm::HumanAddress;

use crate::{
    acpi::{self, DiscoveryError},
    arch::{
        self, InterruptVector, apic, gdt, interrupts,
        ioapic::{self, Redirection},
        pit, ps2,
    },
    mem::{self, MemoryError},
    smp::{self, LimineCore, SecondaryEntry},
};

/// ISA line of the PS/2 keyboard.
const KEYBOARD_IRQ: u8 = 1;

pub struct HardwarePlatform;

fn memory_error(error: MemoryError) -> BringUpError {
    log::error!("{}", error);
    BringUpError::Memory(match error {
        MemoryError::NoArena(_) => "no usable region fits the boot heap",
        MemoryError::Heap(_) => "boot heap rejected its arena",
        MemoryError::NotReady => "frame allocator not ready",
        MemoryError::PageTablesExhausted => "out of frames for page tables",
    })
}

fn discovery_error(error: DiscoveryError) -> BringUpError {
    log::error!("{}", error);
    BringUpError::Discovery(match error {
        DiscoveryError::NoRsdp => "no RSDP",
        DiscoveryError::Tables(_) => "unreadable ACPI tables",
        DiscoveryError::NoApic => "no APIC interrupt model",
    })
}

fn local_apic() -> Result<&'static apic::LocalApic, BringUpError> {
    apic::get().ok_or(BringUpError::NoLocalController)
}

impl Platform for HardwarePlatform {
    type Core = LimineCore;

    fn load_descriptor_table(&self, core: CoreId) {
        gdt::load(core);
    }

    fn prepare_interrupt_table(&self) {
        interrupts::prepare();
    }

    fn install_interrupt_table(&self, core: CoreId) {
        interrupts::install();
        log::trace!("{}: interrupt table installed", core);
    }

    fn enable_interrupts(&self) {
        arch::enable_interrupts();
    }

    fn disable_interrupts(&self) {
        arch::disable_interrupts();
    }

    fn init_memory(&self) -> Result<(), BringUpError> {
        mem::init().map_err(memory_error)
    }

    fn discover_platform(&self) -> Result<(), BringUpError> {
        let topology = acpi::discover().map_err(discovery_error)?;

        // The MSR is authoritative; firmware may have relocated the window.
        let lapic_phys = apic::physical_base();
        if lapic_phys != topology.local_apic_address {
            log::warn!(
                "MADT places the local APIC at {}, IA32_APIC_BASE at {}",
                HumanAddress::from(topology.local_apic_address),
                HumanAddress::from(lapic_phys)
            );
        }
        let lapic_base =
            mem::map_mmio(lapic_phys, apic::REGISTER_WINDOW).map_err(memory_error)?;
        // SAFETY: map_mmio mapped the register window uncached.
        unsafe { apic::init(lapic_base) };

        if let Some(info) = topology.io_apic {
            let base =
                mem::map_mmio(info.address, ioapic::REGISTER_WINDOW).map_err(memory_error)?;
            // SAFETY: see above.
            let io = unsafe { ioapic::init(base, info.id, info.gsi_base) };
            log::debug!(
                "I/O APIC {} at {}: GSIs {}..{}",
                io.id(),
                HumanAddress::from(info.address),
                io.gsi_base(),
                io.gsi_base() + io.redirection_entries()
            );
        }
        Ok(())
    }

    fn capture_topology(&self) -> Option<Topology<LimineCore>> {
        smp::capture_topology()
    }

    fn calibrate_timer(&self) -> Result<TimerCalibration, BringUpError> {
        let lapic = local_apic()?;
        // The timer only counts once the controller is enabled.
        lapic.enable(true);
        pit::calibrate(lapic).map_err(|error| {
            log::error!("{}", error);
            BringUpError::TimerCalibration
        })
    }

    fn init_local_controller(
        &self,
        core: CoreId,
    ) -> Result<LocalControllerState, BringUpError> {
        let lapic = local_apic()?;
        lapic.enable(core.is_primary());
        Ok(LocalControllerState::masked(lapic.id()))
    }

    fn init_io_router(&self, primary_lapic_id: u32) -> Result<(), BringUpError> {
        let io = ioapic::get().ok_or(BringUpError::NoIoRouter)?;
        let topology =
            acpi::interrupt_topology().ok_or(BringUpError::Discovery("MADT not read"))?;

        ioapic::mask_legacy_pics();
        io.mask_all();

        let route = topology.isa_route(KEYBOARD_IRQ);
        let redirection = Redirection {
            vector: InterruptVector::KEYBOARD.value(),
            destination: primary_lapic_id,
            active_low: route.active_low,
            level_triggered: route.level_triggered,
            masked: false,
        };
        if io.route(route.gsi, redirection) {
            log::debug!(
                "keyboard: IRQ {} -> GSI {} -> {} on LAPIC {}",
                KEYBOARD_IRQ,
                route.gsi,
                InterruptVector::KEYBOARD,
                primary_lapic_id
            );
        } else {
            log::warn!("GSI {} is not served by I/O APIC {}", route.gsi, io.id());
        }
        Ok(())
    }

    fn drain_pending_input(&self) -> Option<u8> {
        ps2::drain_pending()
    }

    fn arm_timer(&self, calibration: &TimerCalibration, hz: u32) -> Result<(), BringUpError> {
        let lapic = local_apic()?;
        lapic.start_periodic(calibration.divider, calibration.initial_count(hz));
        Ok(())
    }

    fn current_lapic_id(&self) -> u32 {
        apic::get().map_or_else(arch::current_lapic_id, |lapic| lapic.id())
    }

    fn secondary_entry(&self) -> SecondaryEntry {
        smp::secondary_entry
    }

    fn halt(&self) -> ! {
        arch::park()
    }
}
