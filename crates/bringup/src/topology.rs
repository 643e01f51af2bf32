//! Logical core enumeration.

use alloc::vec::Vec;
use core::fmt;

use crate::DispatchError;

/// Maximum number of cores brought up. Further cores reported by firmware stay parked
/// in the bootloader.
pub const MAX_CORES: usize = 64;

/// Index of a logical core in the captured [`Topology`]. Index 0 is always the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreId(usize);

impl CoreId {
    pub const PRIMARY: CoreId = CoreId(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }

    pub const fn is_primary(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// A core as reported by the bootloader's MP protocol.
pub trait BootCore {
    /// The routine a dispatched core jumps to.
    type Entry: Copy;

    fn lapic_id(&self) -> u32;

    /// Redirects the parked core to `entry`. The core starts running immediately.
    fn dispatch(&self, entry: Self::Entry);
}

/// The cores taking part in bring-up, primary first.
pub struct Topology<C> {
    cores: Vec<C>,
}

impl<C: BootCore> Topology<C> {
    /// Captures `cores`, moving the one with `primary_lapic_id` to index 0.
    ///
    /// Relative order of the other cores is kept. Cores past [`MAX_CORES`] are dropped.
    pub fn new(cores: impl IntoIterator<Item = C>, primary_lapic_id: u32) -> Self {
        let mut cores: Vec<C> = cores.into_iter().collect();

        match cores.iter().position(|c| c.lapic_id() == primary_lapic_id) {
            Some(idx) => {
                let primary = cores.remove(idx);
                cores.insert(0, primary);
            }
            None => log::warn!(
                "primary LAPIC id {} missing from the core list; assuming the first entry",
                primary_lapic_id
            ),
        }

        if cores.len() > MAX_CORES {
            log::warn!(
                "{} cores reported, only bringing up the first {}",
                cores.len(),
                MAX_CORES
            );
            cores.truncate(MAX_CORES);
        }

        Self { cores }
    }

    pub fn len(&self) -> usize {
        self.cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }

    pub fn get(&self, core: CoreId) -> Option<&C> {
        self.cores.get(core.as_usize())
    }

    /// Returns the index of the core with `lapic_id`.
    pub fn find(&self, lapic_id: u32) -> Option<CoreId> {
        self.cores
            .iter()
            .position(|c| c.lapic_id() == lapic_id)
            .map(CoreId::new)
    }

    /// Iterates over every core except the primary.
    pub fn secondaries(&self) -> impl Iterator<Item = (CoreId, &C)> {
        self.cores
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, core)| (CoreId::new(idx), core))
    }

    /// Sends `core` to `entry`.
    ///
    /// The primary is already running the caller, so dispatching it is refused and
    /// nothing is written.
    pub fn dispatch(&self, core: CoreId, entry: C::Entry) -> Result<(), DispatchError> {
        if core.is_primary() {
            log::warn!("ignoring request to redirect the primary core");
            return Err(DispatchError::PrimaryCore);
        }

        let target = self.get(core).ok_or(DispatchError::UnknownCore(core))?;
        log::debug!("dispatching {} (LAPIC id {})", core, target.lapic_id());
        target.dispatch(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{DispatchLog, FakeCore};

    fn topology(lapic_ids: &[u32], primary: u32) -> (Topology<FakeCore>, DispatchLog) {
        let log = DispatchLog::default();
        let cores = lapic_ids.iter().map(|&id| FakeCore::new(id, &log));
        (Topology::new(cores, primary), log)
    }

    #[test]
    fn primary_moves_to_front() {
        let (topology, _) = topology(&[4, 7, 0, 9], 0);

        let ids: Vec<u32> = (0..topology.len())
            .map(|i| topology.get(CoreId::new(i)).unwrap().lapic_id())
            .collect();
        assert_eq!(ids, vec![0, 4, 7, 9]);
        assert_eq!(topology.find(7), Some(CoreId::new(2)));
        assert_eq!(topology.find(42), None);
    }

    #[test]
    fn missing_primary_keeps_order() {
        let (topology, _) = topology(&[3, 1], 8);
        assert_eq!(topology.find(3), Some(CoreId::PRIMARY));
    }

    #[test]
    fn capped_at_max_cores() {
        let ids: Vec<u32> = (0..(MAX_CORES as u32 + 6)).collect();
        let (topology, _) = topology(&ids, 0);
        assert_eq!(topology.len(), MAX_CORES);
    }

    #[test]
    fn dispatching_primary_is_a_no_op() {
        let (topology, log) = topology(&[0, 1], 0);

        assert_eq!(
            topology.dispatch(CoreId::PRIMARY, 0xdead),
            Err(DispatchError::PrimaryCore)
        );
        assert!(log.writes().is_empty());
    }

    #[test]
    fn dispatching_unknown_core_fails() {
        let (topology, log) = topology(&[0, 1], 0);

        assert_eq!(
            topology.dispatch(CoreId::new(2), 0xdead),
            Err(DispatchError::UnknownCore(CoreId::new(2)))
        );
        assert!(log.writes().is_empty());
    }

    #[test]
    fn dispatch_writes_entry() {
        let (topology, log) = topology(&[0, 5], 0);

        topology.dispatch(CoreId::new(1), 0xbeef).unwrap();
        assert_eq!(log.writes(), vec![(5, 0xbeef)]);
    }

    #[test]
    fn secondaries_skip_primary() {
        let (topology, _) = topology(&[2, 0, 1], 0);
        let ids: Vec<_> = topology.secondaries().map(|(id, c)| (id, c.lapic_id())).collect();
        assert_eq!(ids, vec![(CoreId::new(1), 2), (CoreId::new(2), 1)]);
    }

    #[test]
    fn core_id_display() {
        assert_eq!(CoreId::new(3).to_string(), "cpu3");
        assert!(CoreId::PRIMARY.is_primary());
    }
}
