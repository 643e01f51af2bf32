//! Physical frame allocator.
//!
//! The manager owns a [`MemoryMap`] and hands out single 4 KiB frames from it using a
//! next-fit search: each allocation resumes scanning where the previous one stopped, so
//! repeated allocations walk memory linearly instead of rescanning low memory.

use thiserror::Error;

use crate::{
    FrameNumber, FrameState, HumanSize, MemoryMap, PAGE_SIZE, PhysicalAddress, PhysicalFrame,
};

/// Errors returned by the [`PhysicalMemoryManager`].
///
/// A rejected operation never changes allocator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PmmError {
    /// Every usable frame is in use.
    #[error("out of physical memory")]
    OutOfMemory,
    /// The address does not lie in usable memory.
    #[error("frame {0} is not managed by the allocator")]
    Unmanaged(PhysicalAddress),
    /// The frame is managed but not currently allocated (double free).
    #[error("frame {0} is not allocated")]
    NotAllocated(PhysicalAddress),
    /// The address is not page aligned.
    #[error("address {0} is not page aligned")]
    Misaligned(PhysicalAddress),
}

/// Allocates and frees physical page frames.
pub struct PhysicalMemoryManager {
    memory_map: MemoryMap,
    /// Where the next allocation starts searching.
    cursor: FrameNumber,
    total_frames: usize,
    free_frames: usize,
}

impl PhysicalMemoryManager {
    /// Creates a manager over every free frame in `memory_map`.
    pub fn new(memory_map: MemoryMap) -> Self {
        let total_frames = memory_map.count(FrameState::Free) + memory_map.count(FrameState::Used);
        let free_frames = memory_map.count(FrameState::Free);

        log::debug!(
            "physical memory manager: {} frames ({}) usable, {} free",
            total_frames,
            HumanSize(total_frames * PAGE_SIZE),
            free_frames
        );

        Self {
            memory_map,
            cursor: FrameNumber::new(0),
            total_frames,
            free_frames,
        }
    }

    /// Allocates one frame.
    ///
    /// Returns [`PmmError::OutOfMemory`] once every usable frame is in use. Never returns
    /// a frame that is already used or lies outside usable memory.
    pub fn allocate(&mut self) -> Result<PhysicalFrame, PmmError> {
        if self.free_frames == 0 {
            return Err(PmmError::OutOfMemory);
        }

        let frame = self
            .memory_map
            .next_free(self.cursor)
            .ok_or(PmmError::OutOfMemory)?;

        let state = self
            .memory_map
            .state_mut(frame)
            .ok_or(PmmError::OutOfMemory)?;
        *state = FrameState::Used;

        self.free_frames -= 1;
        self.cursor = frame + 1;

        let frame = PhysicalFrame::from_number(frame);
        log::trace!("allocated {:?}", frame);
        Ok(frame)
    }

    /// Returns a frame obtained from [`allocate`](Self::allocate).
    ///
    /// The address must be the frame's page-aligned start address. Addresses outside
    /// usable memory and frames that are not currently allocated are rejected.
    pub fn free(&mut self, address: PhysicalAddress) -> Result<(), PmmError> {
        let frame = PhysicalFrame::from_start_address(address).ok_or(PmmError::Misaligned(address))?;

        let state = self
            .memory_map
            .state_mut(frame.number())
            .ok_or(PmmError::Unmanaged(address))?;

        match *state {
            FrameState::Used => {
                *state = FrameState::Free;
                self.free_frames += 1;
                log::trace!("freed {:?}", frame);
                Ok(())
            }
            FrameState::Free => Err(PmmError::NotAllocated(address)),
            FrameState::Unavailable => Err(PmmError::Unmanaged(address)),
        }
    }

    /// Marks every free frame touched by `[base, base + size)` as used.
    ///
    /// Used at start-up to hand memory that is already spoken for (such as the boot heap
    /// arena) out of the manager's reach. Returns the number of frames claimed.
    pub fn claim(&mut self, base: PhysicalAddress, size: usize) -> usize {
        if size == 0 {
            return 0;
        }

        let start = base.frame_number();
        let end = (base + size).align_up(PAGE_SIZE).frame_number();

        let mut claimed = 0;
        for number in start.as_usize()..end.as_usize() {
            if let Some(state) = self.memory_map.state_mut(FrameNumber::new(number))
                && *state == FrameState::Free
            {
                *state = FrameState::Used;
                claimed += 1;
            }
        }

        self.free_frames -= claimed;
        log::debug!(
            "claimed {} frames at {} ({})",
            claimed,
            base,
            HumanSize(claimed * PAGE_SIZE)
        );
        claimed
    }

    /// Returns the state of the frame containing `address`.
    pub fn state(&self, address: PhysicalAddress) -> FrameState {
        self.memory_map.state_at(address)
    }

    /// Number of usable frames (free plus used). Constant after construction.
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    pub fn used_frames(&self) -> usize {
        self.total_frames - self.free_frames
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::RegionKind;
    use crate::memmap::tests::TestRegion;

    fn manager(regions: &[TestRegion]) -> PhysicalMemoryManager {
        PhysicalMemoryManager::new(MemoryMap::from_boot_map(regions))
    }

    fn scenario_map() -> Vec<TestRegion> {
        vec![
            TestRegion::new(0x0, 0x1000, RegionKind::Bad),
            TestRegion::new(0x1000, 0x4000, RegionKind::Usable),
            TestRegion::new(0x5000, 0x1000, RegionKind::Reserved),
        ]
    }

    #[test]
    fn scenario_yields_four_frames_then_out_of_memory() {
        let mut pmm = manager(&scenario_map());
        assert_eq!(pmm.total_frames(), 4);

        let mut got: Vec<usize> = (0..4)
            .map(|_| pmm.allocate().unwrap().start_address().as_usize())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![0x1000, 0x2000, 0x3000, 0x4000]);

        assert_eq!(pmm.allocate(), Err(PmmError::OutOfMemory));
        assert_eq!(pmm.free_frames(), 0);
        assert_eq!(pmm.used_frames(), 4);
    }

    #[test]
    fn never_returns_unusable_frames() {
        let mut pmm = manager(&[
            TestRegion::usable(0, PAGE_SIZE * 64),
            TestRegion::reserved(PAGE_SIZE * 8, PAGE_SIZE * 8),
            TestRegion::new(PAGE_SIZE * 32, PAGE_SIZE * 4, RegionKind::Reclaimable),
            TestRegion::new(PAGE_SIZE * 40, PAGE_SIZE, RegionKind::Bad),
        ]);

        let usable = 64 - 8 - 4 - 1;
        assert_eq!(pmm.total_frames(), usable);

        let mut seen = HashSet::new();
        while let Ok(frame) = pmm.allocate() {
            let n = frame.number().as_usize();
            assert!(!(8..16).contains(&n));
            assert!(!(32..36).contains(&n));
            assert_ne!(n, 40);
            assert!(seen.insert(n), "frame {} handed out twice", n);
        }
        assert_eq!(seen.len(), usable);
    }

    #[test]
    fn usable_entry_inside_earlier_reserved_entry_is_not_allocated() {
        let mut pmm = manager(&[
            TestRegion::reserved(0x0, 0x4000),
            TestRegion::usable(0x1000, 0x2000),
        ]);

        assert_eq!(pmm.total_frames(), 0);
        assert_eq!(pmm.allocate(), Err(PmmError::OutOfMemory));
        assert_eq!(pmm.state(PhysicalAddress::new(0x1000)), FrameState::Unavailable);
    }

    #[test]
    fn free_restores_partition() {
        let mut pmm = manager(&scenario_map());

        let a = pmm.allocate().unwrap();
        let b = pmm.allocate().unwrap();
        assert_eq!(pmm.free_frames() + pmm.used_frames(), pmm.total_frames());
        assert_eq!(pmm.used_frames(), 2);

        pmm.free(a.start_address()).unwrap();
        pmm.free(b.start_address()).unwrap();
        assert_eq!(pmm.free_frames(), 4);
        assert_eq!(pmm.used_frames(), 0);
        assert_eq!(pmm.state(a.start_address()), FrameState::Free);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut pmm = manager(&scenario_map());
        let frame = pmm.allocate().unwrap();
        pmm.free(frame.start_address()).unwrap();

        let free_before = pmm.free_frames();
        assert_eq!(
            pmm.free(frame.start_address()),
            Err(PmmError::NotAllocated(frame.start_address()))
        );
        assert_eq!(pmm.free_frames(), free_before);
    }

    #[test]
    fn free_of_unmanaged_address_is_rejected() {
        let mut pmm = manager(&scenario_map());
        pmm.allocate().unwrap();

        for addr in [0x0, 0x5000, 0x10_0000] {
            let addr = PhysicalAddress::new(addr);
            assert_eq!(pmm.free(addr), Err(PmmError::Unmanaged(addr)));
        }
        assert_eq!(pmm.used_frames(), 1);
    }

    #[test]
    fn free_of_misaligned_address_is_rejected() {
        let mut pmm = manager(&scenario_map());
        let frame = pmm.allocate().unwrap();

        let addr = frame.start_address() + 8;
        assert_eq!(pmm.free(addr), Err(PmmError::Misaligned(addr)));
        assert_eq!(pmm.state(frame.start_address()), FrameState::Used);
    }

    #[test]
    fn next_fit_wraps_around() {
        let mut pmm = manager(&scenario_map());

        let frames: Vec<_> = (0..4).map(|_| pmm.allocate().unwrap()).collect();
        pmm.free(frames[1].start_address()).unwrap();

        // The cursor sits past the last frame; the search must wrap to find the hole.
        assert_eq!(pmm.allocate(), Ok(frames[1]));
    }

    #[test]
    fn allocation_spans_sparse_sections() {
        let high = crate::FRAMES_PER_SECTION * 3 * PAGE_SIZE;
        let mut pmm = manager(&[
            TestRegion::usable(0, PAGE_SIZE),
            TestRegion::usable(high, PAGE_SIZE),
        ]);

        let mut got: Vec<_> = (0..2)
            .map(|_| pmm.allocate().unwrap().start_address().as_usize())
            .collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, high]);
        assert_eq!(pmm.allocate(), Err(PmmError::OutOfMemory));
    }

    #[test]
    fn claim_takes_frames_out_of_circulation() {
        let mut pmm = manager(&[TestRegion::usable(0, PAGE_SIZE * 16)]);

        let claimed = pmm.claim(PhysicalAddress::new(PAGE_SIZE * 4), PAGE_SIZE * 4 + 1);
        assert_eq!(claimed, 5);
        assert_eq!(pmm.free_frames(), 11);
        assert_eq!(pmm.total_frames(), 16);

        // Claiming again finds nothing left to take.
        assert_eq!(pmm.claim(PhysicalAddress::new(PAGE_SIZE * 4), PAGE_SIZE * 4), 0);

        while let Ok(frame) = pmm.allocate() {
            assert!(!(4..9).contains(&frame.number().as_usize()));
        }
    }

    #[test]
    fn empty_map_is_out_of_memory() {
        let mut pmm = manager(&[TestRegion::reserved(0, PAGE_SIZE * 16)]);
        assert_eq!(pmm.total_frames(), 0);
        assert_eq!(pmm.allocate(), Err(PmmError::OutOfMemory));
    }

    #[test]
    fn errors_display_address() {
        let err = PmmError::NotAllocated(PhysicalAddress::new(0x2000));
        assert_eq!(err.to_string(), "frame 0x2000 is not allocated");
    }
}
