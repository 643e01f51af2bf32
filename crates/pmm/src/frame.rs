//! Physical frames and their bookkeeping state.

use core::fmt;

use crate::{FrameNumber, PhysicalAddress};

/// Size of a page frame in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Bookkeeping state of a single page frame.
///
/// Every frame the memory map knows about is in exactly one of these states. Frames
/// the memory map has no storage for are implicitly [`FrameState::Unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FrameState {
    /// Not backed by usable RAM: reserved, bad, firmware-owned, or a hole.
    #[default]
    Unavailable = 0,
    /// Usable and not handed out.
    Free = 1,
    /// Usable and currently owned by a caller.
    Used = 2,
}

/// A page-aligned physical frame handed out by the
/// [`PhysicalMemoryManager`](crate::PhysicalMemoryManager).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalFrame(PhysicalAddress);

impl PhysicalFrame {
    /// Returns the frame starting at `address`, or `None` if the address is not page aligned.
    pub const fn from_start_address(address: PhysicalAddress) -> Option<Self> {
        if address.is_aligned(PAGE_SIZE) {
            Some(Self(address))
        } else {
            None
        }
    }

    pub const fn from_number(number: FrameNumber) -> Self {
        Self(number.start_address())
    }

    #[inline]
    pub const fn start_address(self) -> PhysicalAddress {
        self.0
    }

    #[inline]
    pub const fn number(self) -> FrameNumber {
        self.0.frame_number()
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalFrame({:#x})", self.0.as_usize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_requires_alignment() {
        assert!(PhysicalFrame::from_start_address(PhysicalAddress::new(0x2000)).is_some());
        assert!(PhysicalFrame::from_start_address(PhysicalAddress::new(0x2010)).is_none());
    }

    #[test]
    fn frame_number_follows_address() {
        let frame = PhysicalFrame::from_number(FrameNumber::new(2));
        assert_eq!(frame.start_address(), PhysicalAddress::new(0x2000));
        assert_eq!(frame.number(), FrameNumber::new(2));
    }

    #[test]
    fn default_state_is_unavailable() {
        assert_eq!(FrameState::default(), FrameState::Unavailable);
    }
}
