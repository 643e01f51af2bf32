//! The hardware seam between the orchestrator and the drivers.

use crate::{BootCore, BringUpError, CoreId, Topology};

/// Result of measuring a core's local timer against the reference clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCalibration {
    /// Timer ticks per millisecond at `divider`.
    pub ticks_per_ms: u32,
    /// Divide configuration the measurement was taken with (raw register encoding).
    pub divider: u8,
}

impl TimerCalibration {
    /// Initial count for a periodic timer firing `hz` times per second.
    ///
    /// Never zero, as a zero count stops the timer.
    pub fn initial_count(&self, hz: u32) -> u32 {
        let hz = hz.max(1) as u64;
        let count = self.ticks_per_ms as u64 * 1000 / hz;
        count.clamp(1, u32::MAX as u64) as u32
    }
}

/// State of one core's local interrupt controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalControllerState {
    pub lapic_id: u32,
    pub calibration: Option<TimerCalibration>,
    pub timer_masked: bool,
}

impl LocalControllerState {
    /// A freshly enabled controller: no calibration yet, timer masked.
    pub const fn masked(lapic_id: u32) -> Self {
        Self {
            lapic_id,
            calibration: None,
            timer_masked: true,
        }
    }
}

/// Everything bring-up needs from the machine.
///
/// Methods act on the calling core unless they take a [`CoreId`], in which case the id
/// names the calling core so implementations can pick its per-core structures.
pub trait Platform {
    type Core: BootCore;

    /// Builds (once per core) and loads the descriptor table and task-state segment.
    fn load_descriptor_table(&self, core: CoreId);

    /// Builds the shared interrupt vector table. Called once, by the primary.
    fn prepare_interrupt_table(&self);

    /// Loads the shared vector table on `core`.
    fn install_interrupt_table(&self, core: CoreId);

    fn enable_interrupts(&self);

    fn disable_interrupts(&self);

    /// Builds the frame allocator from the boot memory map.
    fn init_memory(&self) -> Result<(), BringUpError>;

    /// Reads firmware tables describing the interrupt controllers.
    fn discover_platform(&self) -> Result<(), BringUpError>;

    /// Enumerates the cores the bootloader can start, or `None` without MP support.
    fn capture_topology(&self) -> Option<Topology<Self::Core>>;

    /// Measures the calling core's local timer. Interrupts are disabled.
    fn calibrate_timer(&self) -> Result<TimerCalibration, BringUpError>;

    /// Enables the calling core's local interrupt controller with its timer masked.
    fn init_local_controller(&self, core: CoreId)
    -> Result<LocalControllerState, BringUpError>;

    /// Programs the shared I/O interrupt router, delivering to `primary_lapic_id`.
    fn init_io_router(&self, primary_lapic_id: u32) -> Result<(), BringUpError>;

    /// Reads and discards one byte latched by the input controller, if any.
    fn drain_pending_input(&self) -> Option<u8>;

    /// Starts the calling core's periodic local timer.
    fn arm_timer(&self, calibration: &TimerCalibration, hz: u32) -> Result<(), BringUpError>;

    /// LAPIC id of the calling core.
    fn current_lapic_id(&self) -> u32;

    /// The routine secondary cores are sent to.
    fn secondary_entry(&self) -> <Self::Core as BootCore>::Entry;

    /// Stops the calling core for good.
    fn halt(&self) -> !;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_count_for_frequency() {
        let calibration = TimerCalibration {
            ticks_per_ms: 62_500,
            divider: 0x3,
        };
        assert_eq!(calibration.initial_count(100), 625_000);
        assert_eq!(calibration.initial_count(1000), 62_500);
    }

    #[test]
    fn initial_count_never_zero() {
        let calibration = TimerCalibration {
            ticks_per_ms: 0,
            divider: 0x3,
        };
        assert_eq!(calibration.initial_count(100), 1);
        assert_eq!(
            TimerCalibration {
                ticks_per_ms: 5,
                divider: 0x3
            }
            .initial_count(0),
            5000
        );
    }

    #[test]
    fn fresh_controller_is_masked() {
        let state = LocalControllerState::masked(3);
        assert!(state.timer_masked);
        assert_eq!(state.calibration, None);
    }
}
