//! Human-readable formatting of sizes and addresses for log output.

use core::fmt;

/// Formats a byte count with binary prefixes, dropping trailing zeros from the fraction.
///
/// ```
/// use pmm::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(512)), "512B");
/// assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
/// assert_eq!(format!("{}", HumanSize(4 << 20)), "4MiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanSize(pub usize);

impl From<usize> for HumanSize {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<u64> for HumanSize {
    fn from(value: u64) -> Self {
        Self(value as usize)
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

        let mut unit = 0;
        let mut whole = self.0;
        let mut rem = 0;
        while whole >= 1024 && unit < UNITS.len() - 1 {
            rem = whole % 1024;
            whole /= 1024;
            unit += 1;
        }

        // Two decimal places, truncated.
        let hundredths = rem * 100 / 1024;
        match (hundredths, hundredths % 10) {
            (0, _) => write!(f, "{}{}", whole, UNITS[unit]),
            (h, 0) => write!(f, "{}.{}{}", whole, h / 10, UNITS[unit]),
            (h, _) => write!(f, "{}.{:02}{}", whole, h, UNITS[unit]),
        }
    }
}

/// Formats an address as uppercase hex with `_` between groups of four digits.
///
/// ```
/// use pmm::HumanAddress;
///
/// assert_eq!(format!("{}", HumanAddress(0)), "0x0");
/// assert_eq!(format!("{}", HumanAddress(0xFEE0_0000)), "0xFEE0_0000");
/// assert_eq!(format!("{}", HumanAddress(0x1_0000)), "0x1_0000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanAddress(pub usize);

impl From<usize> for HumanAddress {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<u64> for HumanAddress {
    fn from(value: u64) -> Self {
        Self(value as usize)
    }
}

impl From<crate::PhysicalAddress> for HumanAddress {
    fn from(value: crate::PhysicalAddress) -> Self {
        Self(value.as_usize())
    }
}

impl fmt::Display for HumanAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = if self.0 == 0 {
            1
        } else {
            (usize::BITS - self.0.leading_zeros()).div_ceil(4) as usize
        };

        f.write_str("0x")?;
        for i in (0..digits).rev() {
            let nibble = (self.0 >> (i * 4)) & 0xF;
            write!(f, "{:X}", nibble)?;
            if i != 0 && i % 4 == 0 {
                f.write_str("_")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(HumanSize(0).to_string(), "0B");
        assert_eq!(HumanSize(1023).to_string(), "1023B");
        assert_eq!(HumanSize(1024).to_string(), "1KiB");
        assert_eq!(HumanSize(1025).to_string(), "1KiB");
        assert_eq!(HumanSize(1280).to_string(), "1.25KiB");
        assert_eq!(HumanSize(1572864).to_string(), "1.5MiB");
        assert_eq!(HumanSize(1 << 30).to_string(), "1GiB");
    }

    #[test]
    fn addresses() {
        assert_eq!(HumanAddress(0xF).to_string(), "0xF");
        assert_eq!(HumanAddress(0x1000).to_string(), "0x1000");
        assert_eq!(HumanAddress(0xDEAD_BEEF_CAFE).to_string(), "0xDEAD_BEEF_CAFE");
        assert_eq!(
            HumanAddress(0xFFFF_8000_0000_0000).to_string(),
            "0xFFFF_8000_0000_0000"
        );
    }
}
