//! Frame numbers.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{PAGE_SIZE, PhysicalAddress};

/// Index of a physical page frame (physical address divided by [`PAGE_SIZE`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the physical address of the first byte of this frame.
    #[inline]
    pub const fn start_address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<usize> for FrameNumber {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<FrameNumber> for FrameNumber {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: FrameNumber) -> Self::Output {
        self.0 - rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_address_round_trips_through_frame_number() {
        let frame = FrameNumber::new(0x42);
        assert_eq!(frame.start_address(), PhysicalAddress::new(0x42_000));
        assert_eq!(frame.start_address().frame_number(), frame);
    }

    #[test]
    fn arithmetic() {
        let frame = FrameNumber::new(10);
        assert_eq!(frame + 5, FrameNumber::new(15));
        assert_eq!(FrameNumber::new(15) - frame, 5);
    }
}
