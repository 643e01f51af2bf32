//! Recording test doubles for [`Platform`] and [`BootCore`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    BootCore, BringUpError, CoreId, LocalControllerState, Platform, TimerCalibration, Topology,
};

/// Entry address handed to dispatched fake cores.
pub const FAKE_ENTRY: usize = 0x5ec0_0000;

pub const FAKE_CALIBRATION: TimerCalibration = TimerCalibration {
    ticks_per_ms: 62_500,
    divider: 0x3,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    LoadDescriptors(CoreId),
    PrepareInterrupts,
    InstallInterrupts(CoreId),
    /// Carries the LAPIC id of the core that enabled interrupts.
    EnableInterrupts(u32),
    DisableInterrupts(u32),
    InitMemory,
    Discover,
    CaptureTopology,
    Calibrate,
    InitLocalController(CoreId),
    InitIoRouter(u32),
    Drain(Option<u8>),
    ArmTimer { lapic_id: u32, hz: u32 },
    /// A latched device line fired as soon as interrupts came on.
    InterruptDelivered(u8),
    Halt,
}

/// Shared record of `goto_address` writes as `(lapic_id, entry)`.
#[derive(Debug, Clone, Default)]
pub struct DispatchLog(Arc<Mutex<Vec<(u32, usize)>>>);

impl DispatchLog {
    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeCore {
    lapic_id: u32,
    log: DispatchLog,
}

impl FakeCore {
    pub fn new(lapic_id: u32, log: &DispatchLog) -> Self {
        Self {
            lapic_id,
            log: log.clone(),
        }
    }
}

impl BootCore for FakeCore {
    type Entry = usize;

    fn lapic_id(&self) -> u32 {
        self.lapic_id
    }

    fn dispatch(&self, entry: usize) {
        self.log.0.lock().unwrap().push((self.lapic_id, entry));
    }
}

pub struct FakePlatform {
    /// LAPIC ids reported by the MP protocol, or `None` without MP support.
    lapic_ids: Option<Vec<u32>>,
    primary_lapic_id: u32,
    current_lapic_id: AtomicU32,
    fail_calibration: bool,
    timer_missing: bool,
    latched_input: Mutex<Option<u8>>,
    router_ready: AtomicBool,
    events: Mutex<Vec<Event>>,
    pub dispatches: DispatchLog,
}

impl FakePlatform {
    /// A machine whose MP protocol reports `lapic_ids`; the first is the primary.
    pub fn new(lapic_ids: &[u32]) -> Self {
        let primary = lapic_ids.first().copied().unwrap_or(0);
        Self {
            lapic_ids: Some(lapic_ids.to_vec()),
            primary_lapic_id: primary,
            current_lapic_id: AtomicU32::new(primary),
            fail_calibration: false,
            timer_missing: false,
            latched_input: Mutex::new(None),
            router_ready: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
            dispatches: DispatchLog::default(),
        }
    }

    /// A machine whose bootloader gave no MP information.
    pub fn without_mp() -> Self {
        Self {
            lapic_ids: None,
            ..Self::new(&[0])
        }
    }

    pub fn with_primary(mut self, lapic_id: u32) -> Self {
        self.primary_lapic_id = lapic_id;
        self.current_lapic_id = AtomicU32::new(lapic_id);
        self
    }

    /// A keyboard byte latched before the router is programmed.
    pub fn with_latched_input(self, byte: u8) -> Self {
        *self.latched_input.lock().unwrap() = Some(byte);
        self
    }

    pub fn with_failing_calibration(mut self) -> Self {
        self.fail_calibration = true;
        self
    }

    /// The local timer vanishes between calibration and arming.
    pub fn with_missing_timer(mut self) -> Self {
        self.timer_missing = true;
        self
    }

    /// Makes subsequent calls act as the core with `lapic_id`.
    pub fn run_as(&self, lapic_id: u32) {
        self.current_lapic_id.store(lapic_id, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: Event) -> Option<usize> {
        self.events().iter().position(|&e| e == event)
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn current(&self) -> u32 {
        self.current_lapic_id.load(Ordering::SeqCst)
    }
}

impl Platform for FakePlatform {
    type Core = FakeCore;

    fn load_descriptor_table(&self, core: CoreId) {
        self.record(Event::LoadDescriptors(core));
    }

    fn prepare_interrupt_table(&self) {
        self.record(Event::PrepareInterrupts);
    }

    fn install_interrupt_table(&self, core: CoreId) {
        self.record(Event::InstallInterrupts(core));
    }

    fn enable_interrupts(&self) {
        self.record(Event::EnableInterrupts(self.current()));
        if self.router_ready.load(Ordering::SeqCst)
            && let Some(byte) = *self.latched_input.lock().unwrap()
        {
            self.record(Event::InterruptDelivered(byte));
        }
    }

    fn disable_interrupts(&self) {
        self.record(Event::DisableInterrupts(self.current()));
    }

    fn init_memory(&self) -> Result<(), BringUpError> {
        self.record(Event::InitMemory);
        Ok(())
    }

    fn discover_platform(&self) -> Result<(), BringUpError> {
        self.record(Event::Discover);
        Ok(())
    }

    fn capture_topology(&self) -> Option<Topology<FakeCore>> {
        self.record(Event::CaptureTopology);
        let ids = self.lapic_ids.as_ref()?;
        let cores = ids.iter().map(|&id| FakeCore::new(id, &self.dispatches));
        Some(Topology::new(cores, self.primary_lapic_id))
    }

    fn calibrate_timer(&self) -> Result<TimerCalibration, BringUpError> {
        self.record(Event::Calibrate);
        if self.fail_calibration {
            Err(BringUpError::TimerCalibration)
        } else {
            Ok(FAKE_CALIBRATION)
        }
    }

    fn init_local_controller(
        &self,
        core: CoreId,
    ) -> Result<LocalControllerState, BringUpError> {
        self.record(Event::InitLocalController(core));
        Ok(LocalControllerState::masked(self.current()))
    }

    fn init_io_router(&self, primary_lapic_id: u32) -> Result<(), BringUpError> {
        self.record(Event::InitIoRouter(primary_lapic_id));
        self.router_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn drain_pending_input(&self) -> Option<u8> {
        let byte = self.latched_input.lock().unwrap().take();
        self.record(Event::Drain(byte));
        byte
    }

    fn arm_timer(&self, _calibration: &TimerCalibration, hz: u32) -> Result<(), BringUpError> {
        if self.timer_missing {
            return Err(BringUpError::NoLocalController);
        }
        self.record(Event::ArmTimer {
            lapic_id: self.current(),
            hz,
        });
        Ok(())
    }

    fn current_lapic_id(&self) -> u32 {
        self.current()
    }

    fn secondary_entry(&self) -> usize {
        FAKE_ENTRY
    }

    fn halt(&self) -> ! {
        self.record(Event::Halt);
        panic!("core halted");
    }
}
