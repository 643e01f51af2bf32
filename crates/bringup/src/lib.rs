#![cfg_attr(not(test), no_std)]

//! # Bring-up orchestration
//!
//! Hardware-independent sequencing of early kernel start-up: the per-core [`Stage`]
//! machine, the captured core [`Topology`], the [`PerCore`] state arena, and the
//! [`BringUp`] orchestrator that drives the primary core and every dispatched secondary
//! through a [`Platform`] implementation.
//!
//! The kernel supplies the real platform; tests drive the orchestrator with a recording
//! fake.

extern crate alloc;

mod error;
mod orchestrator;
mod per_core;
mod platform;
mod stage;
mod topology;

#[cfg(test)]
mod fake;

pub use error::{BringUpError, DispatchError};
pub use orchestrator::{BringUp, CoreRecord, SetupReport, shutdown};
pub use per_core::PerCore;
pub use platform::{LocalControllerState, Platform, TimerCalibration};
pub use stage::{Role, Stage};
pub use topology::{BootCore, CoreId, MAX_CORES, Topology};
