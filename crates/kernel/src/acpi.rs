//! Interrupt-controller discovery from the ACPI MADT.

use alloc::vec::Vec;
use core::ptr::NonNull;

use acpi::{
    AcpiError, AcpiHandler, AcpiTables, InterruptModel,
    platform::interrupt::{Polarity, TriggerMode},
};
use limine::request::RsdpRequest;
use pmm::{HumanAddress, PhysicalAddress};
use spin::Once;
use thiserror::Error;

use crate::mem;

#[used]
#[unsafe(link_section = ".requests")]
static RSDP_REQUEST: RsdpRequest = RsdpRequest::new();

static INTERRUPT_TOPOLOGY: Once<InterruptTopology> = Once::new();

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("bootloader did not provide an RSDP")]
    NoRsdp,
    #[error("ACPI tables are unreadable: {0:?}")]
    Tables(AcpiError),
    #[error("firmware does not describe an APIC interrupt model")]
    NoApic,
}

#[derive(Clone, Debug)]
struct DirectMapHandler;

impl AcpiHandler for DirectMapHandler {
    unsafe fn map_physical_region<T>(
        &self,
        physical_address: usize,
        size: usize,
    ) -> acpi::PhysicalMapping<Self, T> {
        // Tables outside the direct map (firmware-reserved ranges) are mapped on demand.
        let virt = mem::map_mmio(physical_address as u64, size)
            .unwrap_or_else(|_| mem::phys_to_virt(PhysicalAddress::new(physical_address)));
        let ptr = NonNull::new(virt.as_mut_ptr::<T>()).unwrap_or(NonNull::dangling());
        unsafe { acpi::PhysicalMapping::new(physical_address, ptr, size, size, self.clone()) }
    }

    fn unmap_physical_region<T>(_region: &acpi::PhysicalMapping<Self, T>) {}
}

/// The first I/O APIC described by the MADT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoApicInfo {
    pub id: u8,
    pub address: u64,
    pub gsi_base: u32,
}

/// How an ISA IRQ reaches the I/O APIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsaRoute {
    pub gsi: u32,
    pub active_low: bool,
    pub level_triggered: bool,
}

impl IsaRoute {
    /// ISA lines are edge triggered and active high unless overridden.
    pub const fn identity(irq: u8) -> Self {
        Self {
            gsi: irq as u32,
            active_low: false,
            level_triggered: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterruptTopology {
    pub local_apic_address: u64,
    pub io_apic: Option<IoApicInfo>,
    pub has_legacy_pics: bool,
    overrides: Vec<(u8, IsaRoute)>,
}

impl InterruptTopology {
    /// Resolves `irq` through the interrupt source overrides.
    pub fn isa_route(&self, irq: u8) -> IsaRoute {
        self.overrides
            .iter()
            .find(|(source, _)| *source == irq)
            .map_or(IsaRoute::identity(irq), |(_, route)| *route)
    }
}

fn rsdp_address() -> Option<usize> {
    let address = RSDP_REQUEST.get_response()?.address();
    // Depending on the base revision the address is virtual (direct map) or physical.
    let offset = mem::hhdm_offset() as usize;
    Some(if address >= offset {
        address - offset
    } else {
        address
    })
}

/// Reads the MADT once and keeps what interrupt routing needs.
pub fn discover() -> Result<&'static InterruptTopology, DiscoveryError> {
    if let Some(topology) = INTERRUPT_TOPOLOGY.get() {
        return Ok(topology);
    }

    let rsdp = rsdp_address().ok_or(DiscoveryError::NoRsdp)?;
    log::debug!("RSDP at {}", HumanAddress(rsdp));

    // SAFETY: the bootloader hands over a valid RSDP, and the handler maps every table
    // the parser touches.
    let tables = unsafe { AcpiTables::from_rsdp(DirectMapHandler, rsdp) }
        .map_err(DiscoveryError::Tables)?;
    let platform = tables.platform_info().map_err(DiscoveryError::Tables)?;

    let InterruptModel::Apic(apic) = platform.interrupt_model else {
        return Err(DiscoveryError::NoApic);
    };

    let io_apic = apic.io_apics.first().map(|io| IoApicInfo {
        id: io.id,
        address: io.address as u64,
        gsi_base: io.global_system_interrupt_base,
    });
    if apic.io_apics.len() > 1 {
        log::debug!(
            "{} I/O APICs present; only the first is programmed",
            apic.io_apics.len()
        );
    }

    let overrides = apic
        .interrupt_source_overrides
        .iter()
        .map(|iso| {
            let route = IsaRoute {
                gsi: iso.global_system_interrupt,
                active_low: matches!(iso.polarity, Polarity::ActiveLow),
                level_triggered: matches!(iso.trigger_mode, TriggerMode::Level),
            };
            log::trace!("ISA IRQ {} -> {:?}", iso.isa_source, route);
            (iso.isa_source, route)
        })
        .collect();

    let topology = InterruptTopology {
        local_apic_address: apic.local_apic_address,
        io_apic,
        has_legacy_pics: apic.also_has_legacy_pics,
        overrides,
    };
    log::info!(
        "MADT: local APIC at {}, I/O APIC {:?}, legacy PICs: {}",
        HumanAddress::from(topology.local_apic_address),
        topology.io_apic,
        topology.has_legacy_pics
    );

    Ok(INTERRUPT_TOPOLOGY.call_once(|| topology))
}

pub fn interrupt_topology() -> Option<&'static InterruptTopology> {
    INTERRUPT_TOPOLOGY.get()
}
