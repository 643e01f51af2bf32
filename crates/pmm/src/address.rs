//! Physical address type.
//!
//! The bring-up core only ever reasons about physical memory; translating to a virtual
//! address (through the bootloader's direct map) is the kernel's business.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PAGE_SIZE};

/// Maximum number of bits in a physical address on x86_64.
pub const MAX_PHYSICAL_BITS: usize = 52;

/// A physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address exceeds [`MAX_PHYSICAL_BITS`].
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            addr >> MAX_PHYSICAL_BITS == 0,
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the raw address value as a `u64`, the width hardware registers use.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Checks if the address is aligned to `align`, which must be a power of two.
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 & (align - 1) == 0
    }

    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(align - 1))
    }

    #[inline]
    pub const fn align_up(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Returns the number of the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / PAGE_SIZE)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAddress({:#x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(addr: u64) -> Self {
        Self::new(addr as usize)
    }
}

impl From<usize> for PhysicalAddress {
    #[inline]
    fn from(addr: usize) -> Self {
        Self::new(addr)
    }
}

impl Add<usize> for PhysicalAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self::new(self.0 + rhs)
    }
}

impl Sub<usize> for PhysicalAddress {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: usize) -> Self::Output {
        Self::new(self.0 - rhs)
    }
}

impl Sub<PhysicalAddress> for PhysicalAddress {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: PhysicalAddress) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_zero_address() {
        assert_eq!(PhysicalAddress::new(0).as_usize(), 0);
    }

    #[test]
    #[should_panic(expected = "physical address exceeds maximum width")]
    fn new_exceeds_max() {
        PhysicalAddress::new(1 << MAX_PHYSICAL_BITS);
    }

    #[test]
    fn alignment() {
        let addr = PhysicalAddress::new(0x1234);
        assert!(!addr.is_aligned(PAGE_SIZE));
        assert_eq!(addr.align_down(PAGE_SIZE), PhysicalAddress::new(0x1000));
        assert_eq!(addr.align_up(PAGE_SIZE), PhysicalAddress::new(0x2000));

        let aligned = PhysicalAddress::new(0x3000);
        assert_eq!(aligned.align_up(PAGE_SIZE), aligned);
        assert_eq!(aligned.align_down(PAGE_SIZE), aligned);
    }

    #[test]
    fn arithmetic() {
        let addr = PhysicalAddress::new(0x1000);
        assert_eq!(addr + 0x10, PhysicalAddress::new(0x1010));
        assert_eq!(addr - 0x10, PhysicalAddress::new(0x0FF0));
        assert_eq!(PhysicalAddress::new(0x3000) - addr, 0x2000);
    }

    #[test]
    fn frame_number_of_unaligned_address() {
        let addr = PhysicalAddress::new(PAGE_SIZE * 3 + 10);
        assert_eq!(addr.frame_number(), FrameNumber::new(3));
    }

    #[test]
    fn formatting() {
        let addr = PhysicalAddress::new(0xdead_b000);
        assert_eq!(format!("{}", addr), "0xdeadb000");
        assert_eq!(format!("{:?}", addr), "PhysicalAddress(0xdeadb000)");
    }
}
