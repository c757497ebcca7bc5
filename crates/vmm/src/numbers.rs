//! Physical frame numbers.
//!
//! Page table entries store frame numbers, the frame allocator hands them out, and
//! every table-to-table reference in this crate is one. Nothing here dereferences
//! them; that is the job of [`PhysicalMemory`](crate::PhysicalMemory).

use core::{fmt, ops::Add};

use crate::{PAGE_SIZE, PhysicalAddress};

/// The index of a 4 KiB physical frame: its start address divided by the page size.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
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
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

/// Steps forward by a number of frames.
impl Add<usize> for FrameNumber {
    type Output = Self;

    #[inline]
    fn add(self, frames: usize) -> Self {
        Self(self.0 + frames)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({:#x})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_address() {
        assert_eq!(FrameNumber::new(0x80000).start(), PhysicalAddress::new(0x8000_0000));
        assert_eq!(
            PhysicalAddress::new(0x8000_0fff).frame_number(),
            FrameNumber::new(0x80000)
        );
    }

    #[test]
    fn stepping() {
        assert_eq!(FrameNumber::new(0x87000) + 3, FrameNumber::new(0x87003));
    }

    #[test]
    fn formatting() {
        let frame = FrameNumber::new(0x10);
        assert_eq!(format!("{frame:?}"), "FrameNumber(0x10)");
        assert_eq!(frame.to_string(), "0x10");
    }
}
