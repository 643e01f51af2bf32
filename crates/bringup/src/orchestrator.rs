//! Sequencing of primary and secondary bring-up.

use spin::Once;

use crate::stage::{self, Role, Stage};
use crate::{
    BringUpError, CoreId, LocalControllerState, PerCore, Platform, TimerCalibration, Topology,
};

/// What the orchestrator tracks for each core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreRecord {
    pub role: Role,
    pub stage: Stage,
    pub controller: Option<LocalControllerState>,
}

impl CoreRecord {
    const fn new(role: Role) -> Self {
        Self {
            role,
            stage: Stage::initial(role),
            controller: None,
        }
    }
}

/// Outcome of [`BringUp::setup_all_cpus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupReport {
    /// Cores taking part in bring-up, primary included.
    pub cores: usize,
    /// Secondary cores sent to the entry routine.
    pub dispatched: usize,
    /// Stale input byte discarded after routing came up.
    pub drained: Option<u8>,
}

/// Drives bring-up of every core through a [`Platform`].
///
/// The primary calls [`initialize_primary`](Self::initialize_primary) and then
/// [`setup_all_cpus`](Self::setup_all_cpus); each dispatched secondary calls
/// [`run_secondary`](Self::run_secondary) from the entry routine. Shared state (memory,
/// interrupt routing) is complete before the first secondary is dispatched, and
/// secondaries never wait on one another.
pub struct BringUp<P: Platform> {
    platform: P,
    cores: PerCore<CoreRecord>,
    topology: Once<Option<Topology<P::Core>>>,
    calibration: Once<TimerCalibration>,
}

impl<P: Platform> BringUp<P> {
    pub fn new(platform: P) -> Self {
        let cores = PerCore::new();
        cores
            .seed(CoreId::PRIMARY, CoreRecord::new(Role::Primary))
            .ok();

        Self {
            platform,
            cores,
            topology: Once::new(),
            calibration: Once::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn record(&self, core: CoreId) -> Option<CoreRecord> {
        self.cores.read(core, |r| *r)
    }

    pub fn stage(&self, core: CoreId) -> Option<Stage> {
        self.cores.read(core, |r| r.stage)
    }

    /// The captured topology, once platform discovery has run and found MP support.
    pub fn topology(&self) -> Option<&Topology<P::Core>> {
        self.topology.get().and_then(Option::as_ref)
    }

    /// Number of cores taking part in bring-up; 1 without MP information.
    pub fn core_count(&self) -> usize {
        self.topology().map_or(1, |t| t.len().max(1))
    }

    /// The primary's timer calibration, once measured.
    pub fn calibration(&self) -> Option<TimerCalibration> {
        self.calibration.get().copied()
    }

    /// Identifies the calling core by its LAPIC id.
    pub fn current_core(&self) -> Result<CoreId, BringUpError> {
        match self.topology() {
            Some(topology) => {
                let lapic_id = self.platform.current_lapic_id();
                topology
                    .find(lapic_id)
                    .ok_or(BringUpError::UnknownLapic(lapic_id))
            }
            None => Ok(CoreId::PRIMARY),
        }
    }

    /// Checks that `core` may move to `next`, runs `action`, then records `next`.
    fn step<R>(
        &self,
        core: CoreId,
        next: Stage,
        action: impl FnOnce() -> Result<R, BringUpError>,
    ) -> Result<R, BringUpError> {
        let record = self.record(core).ok_or(BringUpError::NoSuchCore(core))?;
        stage::check(core, record.role, record.stage, next)?;

        let out = action()?;

        self.cores.update(core, core, |r| r.stage = next)?;
        log::trace!("{}: {:?}", core, next);
        Ok(out)
    }

    /// Descriptor table, interrupt vector table and memory on the primary core.
    pub fn initialize_primary(&self) -> Result<(), BringUpError> {
        let core = CoreId::PRIMARY;

        self.step(core, Stage::DescriptorsLoaded, || {
            self.platform.load_descriptor_table(core);
            Ok(())
        })?;

        self.step(core, Stage::InterruptsInstalled, || {
            self.platform.prepare_interrupt_table();
            self.platform.install_interrupt_table(core);
            Ok(())
        })?;

        self.step(core, Stage::MemoryReady, || self.platform.init_memory())?;
        log::debug!("{}: descriptors, interrupt table and memory ready", core);
        Ok(())
    }

    /// Brings the interrupt controllers up on the primary and starts every secondary.
    ///
    /// Interrupts stay disabled from calibration until routing is configured and any
    /// stale input has been drained; they are re-enabled on the primary last.
    pub fn setup_all_cpus(&self) -> Result<SetupReport, BringUpError> {
        let core = CoreId::PRIMARY;

        self.step(core, Stage::PlatformDiscovered, || {
            self.platform.discover_platform()?;
            match self.topology.call_once(|| self.platform.capture_topology()) {
                Some(topology) => log::info!("{} cores available", topology.len()),
                None => log::debug!("no MP information; continuing on a single core"),
            }
            Ok(())
        })?;

        self.platform.disable_interrupts();

        let calibration = self.step(core, Stage::TimerCalibrated, || {
            self.platform.calibrate_timer()
        })?;
        self.calibration.call_once(|| calibration);
        log::info!(
            "local timer: {} ticks/ms (divide config {:#x})",
            calibration.ticks_per_ms,
            calibration.divider
        );

        let primary_lapic_id = self.step(core, Stage::LocalControllerReady, || {
            let state = LocalControllerState {
                calibration: Some(calibration),
                ..self.platform.init_local_controller(core)?
            };
            self.cores.update(core, core, |r| r.controller = Some(state))?;
            Ok(state.lapic_id)
        })?;

        let drained = self.step(core, Stage::IoRouterReady, || {
            self.platform.init_io_router(primary_lapic_id)?;
            Ok(self.platform.drain_pending_input())
        })?;
        if let Some(byte) = drained {
            log::debug!("discarded stale input byte {:#04x}", byte);
        }

        let dispatched = match self.topology() {
            Some(topology) if topology.len() > 1 => {
                self.step(core, Stage::DispatchingSecondaries, || Ok(()))?;
                self.dispatch_secondaries(topology)?
            }
            _ => {
                log::info!("single core; nothing to dispatch");
                0
            }
        };

        self.step(core, Stage::InterruptsEnabled, || self.enable_interrupts_on(core))?;

        Ok(SetupReport {
            cores: self.core_count(),
            dispatched,
            drained,
        })
    }

    fn dispatch_secondaries(&self, topology: &Topology<P::Core>) -> Result<usize, BringUpError> {
        let entry = self.platform.secondary_entry();
        let mut dispatched = 0;

        for (core, _) in topology.secondaries() {
            self.cores.seed(core, CoreRecord::new(Role::Secondary))?;
            topology.dispatch(core, entry)?;
            dispatched += 1;
        }

        log::info!("dispatched {} secondary cores", dispatched);
        Ok(dispatched)
    }

    /// Per-core bring-up on a freshly dispatched secondary core.
    ///
    /// Leaves the core in [`Stage::Idle`] with interrupts enabled. The caller parks it.
    pub fn run_secondary(&self, lapic_id: u32) -> Result<CoreId, BringUpError> {
        let core = self
            .topology()
            .and_then(|t| t.find(lapic_id))
            .ok_or(BringUpError::UnknownLapic(lapic_id))?;

        self.step(core, Stage::DescriptorsLoaded, || {
            self.platform.load_descriptor_table(core);
            Ok(())
        })?;

        self.step(core, Stage::InterruptsInstalled, || {
            self.platform.install_interrupt_table(core);
            Ok(())
        })?;

        self.step(core, Stage::LocalControllerReady, || {
            // The reference clock is shared, so secondaries reuse the primary's measurement.
            let state = LocalControllerState {
                calibration: self.calibration(),
                ..self.platform.init_local_controller(core)?
            };
            self.cores.update(core, core, |r| r.controller = Some(state))?;
            Ok(())
        })?;

        self.step(core, Stage::Idle, || self.enable_interrupts_on(core))?;
        log::info!("{} (LAPIC id {}) online", core, lapic_id);
        Ok(core)
    }

    /// Enables interrupts on the calling core.
    pub fn enable_interrupts(&self) -> Result<(), BringUpError> {
        let core = self.current_core()?;
        self.enable_interrupts_on(core)
    }

    fn enable_interrupts_on(&self, core: CoreId) -> Result<(), BringUpError> {
        let stage = self.stage(core).unwrap_or(Stage::Uninitialized);
        if !stage.has_interrupt_table() {
            return Err(BringUpError::InterruptsBeforeTable(core));
        }
        self.platform.enable_interrupts();
        Ok(())
    }

    /// Starts the periodic local timer of `core` at `hz`.
    ///
    /// Must be called on `core` itself, after its controller has a calibration.
    pub fn start_local_timer(&self, core: CoreId, hz: u32) -> Result<(), BringUpError> {
        let caller = self.current_core()?;
        self.cores.update(caller, core, |record| {
            let state = record
                .controller
                .as_mut()
                .ok_or(BringUpError::NotCalibrated(core))?;
            let calibration = state
                .calibration
                .ok_or(BringUpError::NotCalibrated(core))?;

            self.platform.arm_timer(&calibration, hz)?;
            state.timer_masked = false;
            log::debug!(
                "{}: timer at {} Hz (initial count {})",
                core,
                hz,
                calibration.initial_count(hz)
            );
            Ok(())
        })?
    }

    /// Logs `error`, marks `core` halted and stops the calling core.
    pub fn halt(&self, core: CoreId, error: &BringUpError) -> ! {
        log::error!("{}: bring-up failed: {}", core, error);
        self.cores.update(core, core, |r| r.stage = Stage::Halted).ok();
        shutdown(&self.platform)
    }
}

/// Disables interrupts and stops the calling core for good.
pub fn shutdown<P: Platform>(platform: &P) -> ! {
    platform.disable_interrupts();
    platform.halt()
}
