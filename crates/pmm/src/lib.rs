#![cfg_attr(not(test), no_std)]

//! # Physical memory bookkeeping
//!
//! Everything the bring-up core knows about physical memory:
//!
//! - [`PhysicalAddress`], [`FrameNumber`] and [`PhysicalFrame`] for talking about it.
//! - [`MemoryMap`], a sparse frame-state table built from the bootloader's memory map.
//! - [`PhysicalMemoryManager`], the single-frame allocator on top of it.
//! - [`BootHeap`], a memblock-style region allocator that backs dynamic memory before the
//!   frame allocator exists.
//!
//! The crate is architecture independent and builds on the host for testing.

extern crate alloc;

mod address;
mod boot_heap;
mod frame;
mod human;
mod memmap;
mod numbers;
mod physical_memory_manager;

pub use address::{MAX_PHYSICAL_BITS, PhysicalAddress};
pub use boot_heap::{BootHeap, HeapError, MemoryRegion};
pub use frame::{FrameState, PAGE_SIZE, PhysicalFrame};
pub use human::{HumanAddress, HumanSize};
pub use memmap::{BootMemoryRegion, FRAMES_PER_SECTION, MemoryMap, RegionKind, SECTION_SIZE, Section};
pub use numbers::FrameNumber;
pub use physical_memory_manager::{PhysicalMemoryManager, PmmError};
