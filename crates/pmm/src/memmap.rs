//! Sparse frame-state table built from the bootloader's memory map.
//!
//! Physical memory is divided into sections of [`FRAMES_PER_SECTION`] frames. A section
//! that contains no usable memory has no storage at all; a section with usable memory
//! stores one [`FrameState`] byte for the smallest frame range covering every usable
//! frame in it. Frames without storage are [`FrameState::Unavailable`].
//!
//! # Building a memory map
//!
//! Implement [`BootMemoryRegion`] on the bootloader's entry type, then call
//! [`MemoryMap::from_boot_map`]:
//!
//! ```ignore
//! impl BootMemoryRegion for MyBootEntry {
//!     fn base(&self) -> PhysicalAddress { /* ... */ }
//!     fn size(&self) -> usize { /* ... */ }
//!     fn kind(&self) -> RegionKind { /* ... */ }
//! }
//!
//! let memory_map = MemoryMap::from_boot_map(boot_entries);
//! ```

use alloc::boxed::Box;
use alloc::vec;

use crate::{FrameNumber, FrameState, HumanSize, PAGE_SIZE, PhysicalAddress};

/// Number of frames covered by one section (128 MiB of physical memory).
pub const FRAMES_PER_SECTION: usize = 32_768;

/// Size of a section in bytes.
pub const SECTION_SIZE: usize = FRAMES_PER_SECTION * PAGE_SIZE;

/// Classification of a boot memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// General-purpose RAM the kernel may hand out.
    Usable,
    /// Firmware, MMIO, the kernel image, or anything else that must not be touched.
    Reserved,
    /// Memory that becomes usable once its current owner (ACPI tables, bootloader
    /// structures) is no longer needed. Treated as unavailable during bring-up.
    Reclaimable,
    /// Memory reported faulty.
    Bad,
}

/// A single entry of a boot-time memory map.
///
/// Implement this on bootloader-specific entry types so the memory map can be built
/// without copying the boot map.
pub trait BootMemoryRegion {
    /// Returns the base physical address of this region.
    fn base(&self) -> PhysicalAddress;

    /// Returns the size of this region in bytes.
    fn size(&self) -> usize;

    /// Returns how the bootloader classified this region.
    fn kind(&self) -> RegionKind;

    fn is_usable(&self) -> bool {
        self.kind() == RegionKind::Usable
    }
}

/// Returns the frames lying wholly inside `[base, base + size)`.
fn whole_frames(base: usize, size: usize) -> (usize, usize) {
    let start = base.div_ceil(PAGE_SIZE);
    let end = base.saturating_add(size) / PAGE_SIZE;
    (start, end.max(start))
}

/// Returns every frame touched by `[base, base + size)`.
fn touched_frames(base: usize, size: usize) -> (usize, usize) {
    let start = base / PAGE_SIZE;
    let end = base.saturating_add(size).div_ceil(PAGE_SIZE);
    (start, end.max(start))
}

/// One section of the memory map.
pub struct Section {
    /// Frame number stored at `states[0]`.
    start_frame: FrameNumber,
    /// Frame states, or `None` if the section holds no usable memory.
    states: Option<Box<[FrameState]>>,
}

impl Section {
    const fn empty() -> Self {
        Self {
            start_frame: FrameNumber::new(0),
            states: None,
        }
    }

    /// Returns the `[start, end)` frame range backed by storage, if any.
    pub fn frame_range(&self) -> Option<(FrameNumber, FrameNumber)> {
        let states = self.states.as_ref()?;
        Some((self.start_frame, self.start_frame + states.len()))
    }

    fn index_of(&self, frame: FrameNumber) -> Option<usize> {
        let len = self.states.as_ref()?.len();
        let idx = frame.as_usize().checked_sub(self.start_frame.as_usize())?;
        (idx < len).then_some(idx)
    }

    fn state(&self, frame: FrameNumber) -> FrameState {
        match (self.index_of(frame), self.states.as_ref()) {
            (Some(idx), Some(states)) => states[idx],
            _ => FrameState::Unavailable,
        }
    }

    fn state_mut(&mut self, frame: FrameNumber) -> Option<&mut FrameState> {
        let idx = self.index_of(frame)?;
        self.states.as_mut().map(|states| &mut states[idx])
    }

    /// Applies `state` to every stored frame in `[start, end)`.
    fn paint(&mut self, start: usize, end: usize, state: FrameState) {
        let Some(states) = self.states.as_mut() else {
            return;
        };
        let first = self.start_frame.as_usize();
        let lo = start.max(first);
        let hi = end.min(first + states.len());
        if lo < hi {
            states[lo - first..hi - first].fill(state);
        }
    }
}

/// Frame-state table for all of physical memory.
///
/// After construction every frame is either [`FrameState::Free`] (wholly inside usable
/// memory) or [`FrameState::Unavailable`]. Only the
/// [`PhysicalMemoryManager`](crate::PhysicalMemoryManager) moves frames between
/// `Free` and `Used`.
pub struct MemoryMap {
    sections: Box<[Section]>,
}

impl MemoryMap {
    /// Builds the table from a boot memory map.
    ///
    /// Only frames lying wholly inside a usable region become [`FrameState::Free`];
    /// partial frames at unaligned region edges are trimmed. Any frame touched by a
    /// non-usable region stays [`FrameState::Unavailable`], whatever the entry order.
    pub fn from_boot_map<R: BootMemoryRegion>(boot_map: &[R]) -> Self {
        let max_usable_frame = boot_map
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| whole_frames(r.base().as_usize(), r.size()))
            .filter(|(start, end)| start < end)
            .map(|(_, end)| end)
            .max();

        let Some(max_usable_frame) = max_usable_frame else {
            log::warn!("boot memory map has no usable memory");
            return Self {
                sections: Box::new([]),
            };
        };

        let section_count = max_usable_frame.div_ceil(FRAMES_PER_SECTION);
        log::trace!(
            "building memory map with {} sections for {} of addressable memory",
            section_count,
            HumanSize(max_usable_frame * PAGE_SIZE)
        );

        let mut sections: Box<[Section]> = (0..section_count)
            .map(|idx| Self::build_section(idx, boot_map))
            .collect();

        // Usable spans first, so a non-usable entry wins over any overlap.
        let usable = boot_map.iter().filter(|r| r.is_usable()).map(|r| {
            let (start, end) = whole_frames(r.base().as_usize(), r.size());
            (start, end, FrameState::Free)
        });
        let unusable = boot_map.iter().filter(|r| !r.is_usable()).map(|r| {
            let (start, end) = touched_frames(r.base().as_usize(), r.size());
            (start, end, FrameState::Unavailable)
        });

        for (start, end, state) in usable.chain(unusable) {
            if start >= end {
                continue;
            }

            let first_section = start / FRAMES_PER_SECTION;
            let last_section = ((end - 1) / FRAMES_PER_SECTION).min(section_count.saturating_sub(1));
            for section in sections.iter_mut().take(last_section + 1).skip(first_section) {
                section.paint(start, end, state);
            }
        }

        Self { sections }
    }

    /// Allocates storage for the frames of section `section_idx` that any usable region covers.
    fn build_section<R: BootMemoryRegion>(section_idx: usize, boot_map: &[R]) -> Section {
        let section_start = section_idx * FRAMES_PER_SECTION;
        let section_end = section_start + FRAMES_PER_SECTION;

        let bounds = boot_map
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| whole_frames(r.base().as_usize(), r.size()))
            .filter(|&(start, end)| start < section_end && end > section_start && start < end)
            .map(|(start, end)| (start.max(section_start), end.min(section_end)))
            .reduce(|(lo_a, hi_a), (lo_b, hi_b)| (lo_a.min(lo_b), hi_a.max(hi_b)));

        let Some((min_frame, max_frame)) = bounds else {
            return Section::empty();
        };

        log::trace!(
            "section {}: storage for {} frames starting at frame {}",
            section_idx,
            max_frame - min_frame,
            min_frame
        );

        Section {
            start_frame: FrameNumber::new(min_frame),
            states: Some(vec![FrameState::Unavailable; max_frame - min_frame].into_boxed_slice()),
        }
    }

    /// Returns the state of `frame`. Frames without storage are unavailable.
    pub fn state(&self, frame: FrameNumber) -> FrameState {
        self.sections
            .get(frame.as_usize() / FRAMES_PER_SECTION)
            .map_or(FrameState::Unavailable, |s| s.state(frame))
    }

    /// Returns the state of the frame containing `address`.
    pub fn state_at(&self, address: PhysicalAddress) -> FrameState {
        self.state(address.frame_number())
    }

    /// Returns a mutable reference to the state of `frame`, if the frame has storage.
    pub(crate) fn state_mut(&mut self, frame: FrameNumber) -> Option<&mut FrameState> {
        self.sections
            .get_mut(frame.as_usize() / FRAMES_PER_SECTION)?
            .state_mut(frame)
    }

    /// Returns the first free frame at or after `from`, wrapping around to the start of
    /// memory once.
    pub(crate) fn next_free(&self, from: FrameNumber) -> Option<FrameNumber> {
        let scan = |section: &Section, lo: usize, hi: usize| -> Option<FrameNumber> {
            let states = section.states.as_ref()?;
            let first = section.start_frame.as_usize();
            let lo = lo.max(first);
            let hi = hi.min(first + states.len());
            if lo >= hi {
                return None;
            }
            states[lo - first..hi - first]
                .iter()
                .position(|&s| s == FrameState::Free)
                .map(|idx| FrameNumber::new(lo + idx))
        };

        let from = from.as_usize();
        let start_section = from / FRAMES_PER_SECTION;

        self.sections
            .iter()
            .skip(start_section)
            .find_map(|s| scan(s, from, usize::MAX))
            .or_else(|| {
                self.sections
                    .iter()
                    .take(start_section + 1)
                    .find_map(|s| scan(s, 0, from))
            })
    }

    /// Returns one past the highest frame number this map has storage for.
    pub fn frame_limit(&self) -> FrameNumber {
        self.sections
            .iter()
            .rev()
            .find_map(|s| s.frame_range())
            .map_or(FrameNumber::new(0), |(_, end)| end)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Returns the number of frames that have storage, regardless of state.
    pub fn stored_frame_count(&self) -> usize {
        self.sections
            .iter()
            .filter_map(|s| s.states.as_ref())
            .map(|s| s.len())
            .sum()
    }

    /// Returns the number of frames currently in `state`.
    pub fn count(&self, state: FrameState) -> usize {
        self.sections
            .iter()
            .filter_map(|s| s.states.as_ref())
            .map(|s| s.iter().filter(|&&st| st == state).count())
            .sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Boot map entry used by the tests in this crate.
    pub(crate) struct TestRegion {
        base: PhysicalAddress,
        size: usize,
        kind: RegionKind,
    }

    impl TestRegion {
        pub(crate) fn new(base: usize, size: usize, kind: RegionKind) -> Self {
            Self {
                base: PhysicalAddress::new(base),
                size,
                kind,
            }
        }

        pub(crate) fn usable(base: usize, size: usize) -> Self {
            Self::new(base, size, RegionKind::Usable)
        }

        pub(crate) fn reserved(base: usize, size: usize) -> Self {
            Self::new(base, size, RegionKind::Reserved)
        }
    }

    impl BootMemoryRegion for TestRegion {
        fn base(&self) -> PhysicalAddress {
            self.base
        }

        fn size(&self) -> usize {
            self.size
        }

        fn kind(&self) -> RegionKind {
            self.kind
        }
    }

    #[test]
    fn empty_boot_map_creates_empty_memory_map() {
        let boot_map: &[TestRegion] = &[];
        let map = MemoryMap::from_boot_map(boot_map);

        assert!(map.sections().is_empty());
        assert_eq!(map.stored_frame_count(), 0);
        assert_eq!(map.frame_limit(), FrameNumber::new(0));
    }

    #[test]
    fn single_usable_region() {
        let map = MemoryMap::from_boot_map(&[TestRegion::usable(0, PAGE_SIZE * 100)]);

        assert_eq!(map.sections().len(), 1);
        assert_eq!(map.count(FrameState::Free), 100);
        assert_eq!(map.state(FrameNumber::new(0)), FrameState::Free);
        assert_eq!(map.state(FrameNumber::new(99)), FrameState::Free);
        assert_eq!(map.state(FrameNumber::new(100)), FrameState::Unavailable);
        assert_eq!(map.frame_limit(), FrameNumber::new(100));
    }

    #[test]
    fn reserved_only_map_has_no_storage() {
        let map = MemoryMap::from_boot_map(&[TestRegion::reserved(0, PAGE_SIZE * 100)]);

        assert_eq!(map.stored_frame_count(), 0);
        assert_eq!(map.state(FrameNumber::new(0)), FrameState::Unavailable);
    }

    #[test]
    fn leading_and_trailing_holes_have_no_storage() {
        let map = MemoryMap::from_boot_map(&[
            TestRegion::reserved(0, PAGE_SIZE * 1000),
            TestRegion::usable(PAGE_SIZE * 500, PAGE_SIZE * 100),
        ]);

        // Storage covers only the usable span, and the reserved entry still claims it.
        assert_eq!(map.stored_frame_count(), 100);
        assert_eq!(map.count(FrameState::Free), 0);
        assert_eq!(map.state(FrameNumber::new(499)), FrameState::Unavailable);
        assert_eq!(map.state(FrameNumber::new(500)), FrameState::Unavailable);
        assert_eq!(map.state(FrameNumber::new(600)), FrameState::Unavailable);
    }

    #[test]
    fn reserved_entry_wins_regardless_of_order() {
        let reserved_first = MemoryMap::from_boot_map(&[
            TestRegion::reserved(0, PAGE_SIZE * 4),
            TestRegion::usable(PAGE_SIZE, PAGE_SIZE * 2),
            TestRegion::usable(PAGE_SIZE * 4, PAGE_SIZE * 2),
        ]);
        let reserved_last = MemoryMap::from_boot_map(&[
            TestRegion::usable(PAGE_SIZE, PAGE_SIZE * 2),
            TestRegion::usable(PAGE_SIZE * 4, PAGE_SIZE * 2),
            TestRegion::reserved(0, PAGE_SIZE * 4),
        ]);

        for map in [&reserved_first, &reserved_last] {
            assert_eq!(map.count(FrameState::Free), 2);
            for frame in 0..4 {
                assert_eq!(map.state(FrameNumber::new(frame)), FrameState::Unavailable);
            }
            assert_eq!(map.state(FrameNumber::new(4)), FrameState::Free);
            assert_eq!(map.state(FrameNumber::new(5)), FrameState::Free);
        }
    }

    #[test]
    fn later_reserved_entry_punches_hole() {
        let map = MemoryMap::from_boot_map(&[
            TestRegion::usable(0, PAGE_SIZE * 100),
            TestRegion::reserved(PAGE_SIZE * 40, PAGE_SIZE * 20),
        ]);

        assert_eq!(map.stored_frame_count(), 100);
        assert_eq!(map.count(FrameState::Free), 80);
        assert_eq!(map.state(FrameNumber::new(39)), FrameState::Free);
        assert_eq!(map.state(FrameNumber::new(40)), FrameState::Unavailable);
        assert_eq!(map.state(FrameNumber::new(59)), FrameState::Unavailable);
        assert_eq!(map.state(FrameNumber::new(60)), FrameState::Free);
    }

    #[test]
    fn unaligned_usable_edges_are_trimmed() {
        let map = MemoryMap::from_boot_map(&[TestRegion::usable(0x1800, 0x3000)]);

        // 0x1800..0x4800 wholly contains only 0x2000..0x4000.
        assert_eq!(map.count(FrameState::Free), 2);
        assert_eq!(map.state_at(PhysicalAddress::new(0x1800)), FrameState::Unavailable);
        assert_eq!(map.state_at(PhysicalAddress::new(0x2000)), FrameState::Free);
        assert_eq!(map.state_at(PhysicalAddress::new(0x3000)), FrameState::Free);
        assert_eq!(map.state_at(PhysicalAddress::new(0x4000)), FrameState::Unavailable);
    }

    #[test]
    fn partially_overlapping_reserved_entry_removes_whole_frame() {
        let map = MemoryMap::from_boot_map(&[
            TestRegion::usable(0, PAGE_SIZE * 4),
            TestRegion::reserved(PAGE_SIZE + 0x10, 0x20),
        ]);

        assert_eq!(map.count(FrameState::Free), 3);
        assert_eq!(map.state(FrameNumber::new(1)), FrameState::Unavailable);
    }

    #[test]
    fn bad_and_reclaimable_memory_is_unavailable() {
        let map = MemoryMap::from_boot_map(&[
            TestRegion::new(0, PAGE_SIZE * 2, RegionKind::Bad),
            TestRegion::usable(PAGE_SIZE * 2, PAGE_SIZE * 2),
            TestRegion::new(PAGE_SIZE * 4, PAGE_SIZE * 2, RegionKind::Reclaimable),
        ]);

        assert_eq!(map.count(FrameState::Free), 2);
        assert_eq!(map.state(FrameNumber::new(1)), FrameState::Unavailable);
        assert_eq!(map.state(FrameNumber::new(4)), FrameState::Unavailable);
    }

    #[test]
    fn sparse_sections_skip_storage() {
        let third_section = FRAMES_PER_SECTION * 2 * PAGE_SIZE;
        let map = MemoryMap::from_boot_map(&[
            TestRegion::usable(0, PAGE_SIZE * 100),
            TestRegion::usable(third_section, PAGE_SIZE * 50),
        ]);

        assert_eq!(map.sections().len(), 3);
        assert!(map.sections()[1].frame_range().is_none());
        assert_eq!(map.stored_frame_count(), 150);
        assert_eq!(
            map.state(FrameNumber::new(FRAMES_PER_SECTION)),
            FrameState::Unavailable
        );
        assert_eq!(
            map.state(FrameNumber::new(FRAMES_PER_SECTION * 2)),
            FrameState::Free
        );
        assert_eq!(
            map.frame_limit(),
            FrameNumber::new(FRAMES_PER_SECTION * 2 + 50)
        );
    }

    #[test]
    fn region_spanning_sections() {
        let base = (FRAMES_PER_SECTION - 10) * PAGE_SIZE;
        let map = MemoryMap::from_boot_map(&[TestRegion::usable(base, PAGE_SIZE * 20)]);

        assert_eq!(map.sections().len(), 2);
        assert_eq!(map.count(FrameState::Free), 20);
        assert_eq!(
            map.sections()[1].frame_range(),
            Some((
                FrameNumber::new(FRAMES_PER_SECTION),
                FrameNumber::new(FRAMES_PER_SECTION + 10)
            ))
        );
    }

    #[test]
    fn state_mut_only_reaches_stored_frames() {
        let mut map = MemoryMap::from_boot_map(&[TestRegion::usable(0, PAGE_SIZE * 10)]);

        *map.state_mut(FrameNumber::new(5)).unwrap() = FrameState::Used;
        assert_eq!(map.state(FrameNumber::new(5)), FrameState::Used);
        assert!(map.state_mut(FrameNumber::new(10)).is_none());
    }
}
