use thiserror::Error;

use crate::{CoreId, Stage};

/// Errors raised while sequencing bring-up.
///
/// Every variant is fatal for the core that hit it; the kernel logs the error and halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BringUpError {
    /// A step was attempted from a stage that does not lead to it.
    #[error("{core}: cannot move from {from:?} to {to:?}")]
    OutOfOrder { core: CoreId, from: Stage, to: Stage },
    /// Interrupts were to be enabled before the vector table was installed on the core.
    #[error("{0}: interrupts enabled before the vector table was installed")]
    InterruptsBeforeTable(CoreId),
    /// A core tried to write another core's per-core state.
    #[error("{caller} may not modify the state of {owner}")]
    ForeignCore { owner: CoreId, caller: CoreId },
    /// The per-core slot was already handed to its core.
    #[error("{0} already has bring-up state")]
    AlreadySeeded(CoreId),
    /// The per-core slot has never been handed to a core.
    #[error("{0} has no bring-up state")]
    NoSuchCore(CoreId),
    /// A core reported a LAPIC id missing from the captured topology.
    #[error("no core with LAPIC id {0} in the topology")]
    UnknownLapic(u32),
    /// The local timer could not be measured against the reference clock.
    #[error("local timer calibration failed")]
    TimerCalibration,
    /// The local timer was started on a core that has no calibration.
    #[error("{0}: local timer has not been calibrated")]
    NotCalibrated(CoreId),
    /// The frame allocator or boot heap could not be set up.
    #[error("memory initialization failed: {0}")]
    Memory(&'static str),
    /// Firmware tables could not be read.
    #[error("platform discovery failed: {0}")]
    Discovery(&'static str),
    /// The local interrupt controller was used before discovery mapped it.
    #[error("local APIC is not available")]
    NoLocalController,
    /// The platform has no I/O interrupt router.
    #[error("no I/O APIC available")]
    NoIoRouter,
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors raised when redirecting a core to the secondary entry routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The primary core is already running and is never redirected.
    #[error("refusing to dispatch the primary core")]
    PrimaryCore,
    /// The index lies beyond the captured topology.
    #[error("{0} is not part of the topology")]
    UnknownCore(CoreId),
}
