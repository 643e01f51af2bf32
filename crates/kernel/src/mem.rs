// cSpell:ignore Hhdm

use core::ptr::null_mut;

use limine::{
    memory_map::{self, Entry},
    request::{HhdmRequest, MemoryMapRequest, StackSizeRequest},
};
use pmm::{
    BootHeap, BootMemoryRegion, HeapError, HumanAddress, HumanSize, MemoryMap, MemoryRegion,
    PAGE_SIZE, PhysicalAddress, PhysicalMemoryManager, RegionKind,
};
use spin::{Mutex, Once};
use thiserror::Error;
use x86_64::{
    PhysAddr, VirtAddr,
    registers::control::Cr3,
    structures::paging::{
        FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame,
        Size4KiB, mapper::MapToError,
    },
};

#[used]
#[unsafe(link_section = ".requests")]
static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
static HIGHER_HALF_DIRECT_MAP: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
static STACK_SIZE: StackSizeRequest = StackSizeRequest::new().with_size(65536); // 64 KiB per core

/// Smallest arena handed to the boot heap.
const MIN_BOOT_ARENA: usize = 4 * 1024 * 1024;
/// Room left in the arena beyond the frame table.
const BOOT_ARENA_SLACK: usize = 2 * 1024 * 1024;

static HHDM_OFFSET: Once<u64> = Once::new();
static PMM: Once<Mutex<PhysicalMemoryManager>> = Once::new();
static MAP_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("no usable region can hold a {0} boot heap")]
    NoArena(HumanSize),
    #[error("boot heap rejected its arena: {0}")]
    Heap(#[from] HeapError),
    #[error("physical memory manager is not ready")]
    NotReady,
    #[error("out of frames for page tables")]
    PageTablesExhausted,
}

pub fn type_name(entry_type: memory_map::EntryType) -> &'static str {
    match entry_type {
        memory_map::EntryType::USABLE => "USABLE",
        memory_map::EntryType::RESERVED => "RESERVED",
        memory_map::EntryType::ACPI_RECLAIMABLE => "ACPI_RECLAIMABLE",
        memory_map::EntryType::ACPI_NVS => "ACPI_NVS",
        memory_map::EntryType::BAD_MEMORY => "BAD_MEMORY",
        memory_map::EntryType::BOOTLOADER_RECLAIMABLE => "BOOTLOADER_RECLAIMABLE",
        memory_map::EntryType::EXECUTABLE_AND_MODULES => "EXECUTABLE_AND_MODULES",
        memory_map::EntryType::FRAMEBUFFER => "FRAMEBUFFER",
        _ => "UNKNOWN",
    }
}

/// Wrapper around Limine's memory map entry to implement pmm's `BootMemoryRegion` trait.
#[repr(transparent)]
struct LimineMemoryRegion<'a>(&'a Entry);

impl<'a> LimineMemoryRegion<'a> {
    fn wrap_slice(entries: &'a [&'a Entry]) -> &'a [LimineMemoryRegion<'a>] {
        // SAFETY: LimineMemoryRegion is #[repr(transparent)] over &Entry
        unsafe { core::mem::transmute(entries) }
    }
}

impl BootMemoryRegion for LimineMemoryRegion<'_> {
    fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0.base as usize)
    }

    fn size(&self) -> usize {
        self.0.length as usize
    }

    fn kind(&self) -> RegionKind {
        match self.0.entry_type {
            memory_map::EntryType::USABLE => RegionKind::Usable,
            memory_map::EntryType::ACPI_RECLAIMABLE
            | memory_map::EntryType::BOOTLOADER_RECLAIMABLE => RegionKind::Reclaimable,
            memory_map::EntryType::BAD_MEMORY => RegionKind::Bad,
            _ => RegionKind::Reserved,
        }
    }
}

fn boot_entries() -> &'static [&'static Entry] {
    MEMORY_MAP_REQUEST
        .get_response()
        .expect("Memory map request should have been answered")
        .entries()
}

/// Offset of the higher-half direct map.
pub fn hhdm_offset() -> u64 {
    *HHDM_OFFSET.call_once(|| {
        HIGHER_HALF_DIRECT_MAP
            .get_response()
            .expect("Higher-half direct map request should have been answered")
            .offset()
    })
}

pub fn phys_to_virt(address: PhysicalAddress) -> VirtAddr {
    VirtAddr::new(address.as_u64() + hhdm_offset())
}

/// Translates a direct-mapped pointer back to its physical address.
pub fn virt_to_phys(address: u64) -> PhysicalAddress {
    PhysicalAddress::from(address.wrapping_sub(hhdm_offset()))
}

/// Picks the boot heap arena: the start of the largest usable region, big enough for
/// the frame table of every usable frame plus slack.
fn boot_arena(entries: &[LimineMemoryRegion]) -> Result<MemoryRegion, MemoryError> {
    let highest = entries
        .iter()
        .filter(|r| r.is_usable())
        .map(|r| r.base().as_usize().saturating_add(r.size()))
        .max()
        .unwrap_or(0);
    let needed = (highest / PAGE_SIZE + BOOT_ARENA_SLACK)
        .max(MIN_BOOT_ARENA)
        .next_multiple_of(PAGE_SIZE);

    let largest = entries
        .iter()
        .filter(|r| r.is_usable())
        .map(|r| {
            let start = r.base().align_up(PAGE_SIZE);
            let end = (r.base() + r.size()).align_down(PAGE_SIZE);
            (start, end.as_usize().saturating_sub(start.as_usize()))
        })
        .max_by_key(|&(_, size)| size);

    match largest {
        Some((base, size)) if size >= needed => Ok(MemoryRegion::new(base, needed)),
        _ => Err(MemoryError::NoArena(HumanSize(needed))),
    }
}

/// Brings up the boot heap and the physical memory manager.
pub fn init() -> Result<(), MemoryError> {
    if PMM.get().is_some() {
        return Ok(());
    }

    let offset = hhdm_offset();
    let entries = boot_entries();
    for entry in entries {
        log::debug!(
            "{} - {} {} ({})",
            HumanAddress(entry.base as usize),
            HumanAddress((entry.base + entry.length) as usize),
            type_name(entry.entry_type),
            HumanSize(entry.length as usize)
        );
    }
    let regions = LimineMemoryRegion::wrap_slice(entries);

    let arena = boot_arena(regions)?;
    KERNEL_ALLOCATOR.heap.lock().add(arena.base(), arena.size())?;
    log::debug!(
        "boot heap: {} at {} (HHDM offset {})",
        HumanSize(arena.size()),
        HumanAddress::from(arena.base()),
        HumanAddress(offset as usize)
    );

    let memory_map = MemoryMap::from_boot_map(regions);
    log::info!(
        "memory map: {} sections, {} frames tracked, highest frame {}",
        memory_map.sections().len(),
        memory_map.stored_frame_count(),
        memory_map.frame_limit().as_usize().saturating_sub(1)
    );

    let mut pmm = PhysicalMemoryManager::new(memory_map);
    let claimed = pmm.claim(arena.base(), arena.size());
    log::debug!("boot heap arena claimed {} frames", claimed);

    PMM.call_once(|| Mutex::new(pmm));
    Ok(())
}

pub fn pmm() -> Option<&'static Mutex<PhysicalMemoryManager>> {
    PMM.get()
}

pub fn log_usage() {
    if let Some(pmm) = pmm() {
        let pmm = pmm.lock();
        log::info!(
            "physical memory: {} free, {} used of {}",
            HumanSize(pmm.free_frames() * PAGE_SIZE),
            HumanSize(pmm.used_frames() * PAGE_SIZE),
            HumanSize(pmm.total_frames() * PAGE_SIZE)
        );
    }
    let heap = KERNEL_ALLOCATOR.heap.lock();
    log::info!(
        "boot heap: {} free, {} in use of {}",
        HumanSize(heap.available_memory()),
        HumanSize(heap.reserved_memory()),
        HumanSize(heap.total_memory())
    );
}

struct PmmFrames<'a>(&'a Mutex<PhysicalMemoryManager>);

// SAFETY: frames come from the PMM, which never hands out a frame twice.
unsafe impl FrameAllocator<Size4KiB> for PmmFrames<'_> {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let frame = self.0.lock().allocate().ok()?;
        PhysFrame::from_start_address(PhysAddr::new(frame.start_address().as_u64())).ok()
    }
}

/// Maps device registers at `phys` uncached into the direct map and returns their
/// virtual address. Pages that are already mapped are left as they are.
pub fn map_mmio(phys: u64, size: usize) -> Result<VirtAddr, MemoryError> {
    let pmm = pmm().ok_or(MemoryError::NotReady)?;
    let offset = hhdm_offset();
    let _guard = MAP_LOCK.lock();

    let (level_4_frame, _) = Cr3::read();
    let level_4_virt = offset + level_4_frame.start_address().as_u64();
    // SAFETY: the active level 4 table lives in direct-mapped memory, and MAP_LOCK keeps
    // this the only mutable view of it.
    let mut mapper = unsafe {
        OffsetPageTable::new(
            &mut *(level_4_virt as *mut PageTable),
            VirtAddr::new(offset),
        )
    };
    let mut frames = PmmFrames(pmm);
    let flags = PageTableFlags::PRESENT
        | PageTableFlags::WRITABLE
        | PageTableFlags::NO_CACHE
        | PageTableFlags::WRITE_THROUGH
        | PageTableFlags::NO_EXECUTE;

    let first = PhysFrame::<Size4KiB>::containing_address(PhysAddr::new(phys));
    let last = PhysFrame::<Size4KiB>::containing_address(PhysAddr::new(
        phys + size.max(1) as u64 - 1,
    ));
    for frame in PhysFrame::range_inclusive(first, last) {
        let page = Page::<Size4KiB>::containing_address(VirtAddr::new(
            offset + frame.start_address().as_u64(),
        ));
        // SAFETY: the frame holds device registers, which nothing else maps writable.
        match unsafe { mapper.map_to(page, frame, flags, &mut frames) } {
            Ok(flush) => flush.flush(),
            Err(MapToError::PageAlreadyMapped(_) | MapToError::ParentEntryHugePage) => {
                log::trace!("{} already mapped", HumanAddress::from(frame.start_address().as_u64()));
            }
            Err(MapToError::FrameAllocationFailed) => {
                return Err(MemoryError::PageTablesExhausted);
            }
        }
    }

    Ok(VirtAddr::new(offset + phys))
}

#[global_allocator]
static KERNEL_ALLOCATOR: KernelAllocator = KernelAllocator {
    heap: Mutex::new(BootHeap::new()),
};

/// Serves the kernel heap from the boot heap arena through the direct map.
struct KernelAllocator {
    heap: Mutex<BootHeap>,
}

unsafe impl alloc::alloc::GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: alloc::alloc::Layout) -> *mut u8 {
        let Some(&offset) = HHDM_OFFSET.get() else {
            return null_mut();
        };

        let result = self.heap.lock().allocate(layout.size(), layout.align());
        match result {
            Ok(phys) => (phys.as_u64() + offset) as *mut u8,
            Err(error) => {
                log::error!("boot heap error: {:?}", error);
                null_mut()
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: alloc::alloc::Layout) {
        if ptr.is_null() {
            return;
        }

        let phys = virt_to_phys(ptr as u64);
        let result = self.heap.lock().free(phys, layout.size());
        if let Err(error) = result {
            log::error!("boot heap error freeing {}: {:?}", phys, error);
        }
    }
}
