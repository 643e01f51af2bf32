//! Early region allocator used before the frame allocator exists.
//!
//! Modelled on Linux's memblock: two sorted, fixed-capacity lists of physical ranges
//! track the memory the heap may use and the parts of it that are reserved or handed
//! out. Free memory is whatever lies in the first list but not the second. Nothing here
//! allocates, so the heap can back the kernel's global allocator from the first
//! instruction onward.

use thiserror::Error;

use crate::{PAGE_SIZE, PhysicalAddress};

/// Capacity of each region list.
const MAX_REGIONS: usize = 128;

/// Errors returned by the [`BootHeap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("boot heap exhausted")]
    OutOfMemory,
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("boot heap region list is full")]
    RegionsFull,
}

/// A contiguous range of physical memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryRegion {
    base: PhysicalAddress,
    size: usize,
}

impl MemoryRegion {
    pub const fn new(base: PhysicalAddress, size: usize) -> Self {
        Self { base, size }
    }

    /// Returns the smallest page-aligned region covering `[base, base + size)`.
    fn covering_pages(base: PhysicalAddress, size: usize) -> Self {
        let start = base.align_down(PAGE_SIZE);
        let end = (base + size).align_up(PAGE_SIZE);
        Self::new(start, end - start)
    }

    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Exclusive end address.
    pub fn end(&self) -> PhysicalAddress {
        self.base + self.size
    }

    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }

    /// Overlapping or touching.
    pub fn touches(&self, other: &MemoryRegion) -> bool {
        self.base <= other.end() && other.base <= self.end()
    }

    /// Returns the region spanning both `self` and `other`.
    pub fn union(&self, other: &MemoryRegion) -> MemoryRegion {
        let base = self.base.min(other.base);
        let end = self.end().max(other.end());
        MemoryRegion::new(base, end - base)
    }
}

/// Sorted list of disjoint, non-adjacent regions.
struct RegionList {
    regions: [MemoryRegion; MAX_REGIONS],
    len: usize,
}

impl RegionList {
    const fn new() -> Self {
        Self {
            regions: [MemoryRegion::new(PhysicalAddress::new(0), 0); MAX_REGIONS],
            len: 0,
        }
    }

    fn as_slice(&self) -> &[MemoryRegion] {
        &self.regions[..self.len]
    }

    fn insert_at(&mut self, index: usize, region: MemoryRegion) -> Result<(), HeapError> {
        if self.len == MAX_REGIONS {
            return Err(HeapError::RegionsFull);
        }
        self.regions.copy_within(index..self.len, index + 1);
        self.regions[index] = region;
        self.len += 1;
        Ok(())
    }

    fn remove_range(&mut self, start: usize, end: usize) {
        self.regions.copy_within(end..self.len, start);
        self.len -= end - start;
    }

    /// Adds `region`, coalescing it with every region it overlaps or touches.
    fn add(&mut self, region: MemoryRegion) -> Result<(), HeapError> {
        if region.size() == 0 {
            return Ok(());
        }

        let first = self
            .as_slice()
            .iter()
            .position(|r| r.end() >= region.base())
            .unwrap_or(self.len);
        let last = self.as_slice()[first..]
            .iter()
            .position(|r| !r.touches(&region))
            .map_or(self.len, |n| first + n);

        let merged = self.as_slice()[first..last]
            .iter()
            .fold(region, |acc, r| acc.union(r));

        self.remove_range(first, last);
        self.insert_at(first, merged)
    }

    /// Removes `region`, splitting any region it cuts through.
    ///
    /// Fails without touching the list when a split would overflow it.
    fn subtract(&mut self, region: MemoryRegion) -> Result<(), HeapError> {
        if region.size() == 0 {
            return Ok(());
        }

        let splits = self
            .as_slice()
            .iter()
            .filter(|r| r.base() < region.base() && r.end() > region.end())
            .count();
        if self.len + splits > MAX_REGIONS {
            return Err(HeapError::RegionsFull);
        }

        let mut i = 0;
        while i < self.len {
            let existing = self.regions[i];
            if !existing.overlaps(&region) {
                i += 1;
                continue;
            }

            self.remove_range(i, i + 1);
            if existing.base() < region.base() {
                self.insert_at(i, MemoryRegion::new(existing.base(), region.base() - existing.base()))?;
                i += 1;
            }
            if existing.end() > region.end() {
                self.insert_at(i, MemoryRegion::new(region.end(), existing.end() - region.end()))?;
                i += 1;
            }
        }
        Ok(())
    }

    fn total(&self) -> usize {
        self.as_slice().iter().map(|r| r.size()).sum()
    }
}

/// Page-granular first-fit allocator over a set of physical ranges.
///
/// Every allocation is rounded up to whole pages, so the heap suits a small number of
/// long-lived boot-time allocations rather than general use.
pub struct BootHeap {
    memory: RegionList,
    reserved: RegionList,
}

impl BootHeap {
    pub const fn new() -> Self {
        Self {
            memory: RegionList::new(),
            reserved: RegionList::new(),
        }
    }

    /// Hands `[base, base + size)` to the heap. Partial pages at either end are dropped.
    pub fn add(&mut self, base: PhysicalAddress, size: usize) -> Result<(), HeapError> {
        let start = base.align_up(PAGE_SIZE);
        let end = (base + size).align_down(PAGE_SIZE);
        if end <= start {
            return Ok(());
        }
        self.memory.add(MemoryRegion::new(start, end - start))
    }

    /// Allocates `size` bytes (rounded up to whole pages) aligned to `align`.
    pub fn allocate(&mut self, size: usize, align: usize) -> Result<PhysicalAddress, HeapError> {
        if !align.is_power_of_two() {
            return Err(HeapError::InvalidAlignment(align));
        }
        if size == 0 {
            return Err(HeapError::OutOfMemory);
        }

        let size = size.next_multiple_of(PAGE_SIZE);
        let align = align.max(PAGE_SIZE);

        for area in self.memory.as_slice() {
            let mut candidate = area.base().align_up(align);
            while candidate + size <= area.end() {
                let wanted = MemoryRegion::new(candidate, size);
                match self.reserved.as_slice().iter().find(|r| r.overlaps(&wanted)) {
                    Some(blocker) => candidate = blocker.end().align_up(align),
                    None => {
                        self.reserved.add(wanted)?;
                        return Ok(candidate);
                    }
                }
            }
        }

        log::error!("boot heap: cannot satisfy {} byte allocation", size);
        Err(HeapError::OutOfMemory)
    }

    /// Releases an allocation made by [`allocate`](Self::allocate).
    pub fn free(&mut self, base: PhysicalAddress, size: usize) -> Result<(), HeapError> {
        if size == 0 {
            return Ok(());
        }
        self.reserved.subtract(MemoryRegion::covering_pages(base, size))
    }

    /// Ranges handed to the heap with [`add`](Self::add).
    pub fn regions(&self) -> &[MemoryRegion] {
        self.memory.as_slice()
    }

    pub fn total_memory(&self) -> usize {
        self.memory.total()
    }

    pub fn reserved_memory(&self) -> usize {
        self.reserved.total()
    }

    pub fn available_memory(&self) -> usize {
        self.total_memory().saturating_sub(self.reserved_memory())
    }
}

impl Default for BootHeap {
    fn default() -> Self {
        Self::new()
    }
}
