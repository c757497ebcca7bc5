//! Page table entry for Sv39.

use core::fmt;

use crate::FrameNumber;

use super::flags::PageFlags;

/// A single Sv39 page table entry.
///
/// The entry format:
/// - Bits 0-9: Flags (see [`PageFlags`])
/// - Bits 10-53: Physical page number of the target frame
/// - Bits 54-63: Reserved, must be zero
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Position of the physical page number inside an entry.
    const PPN_SHIFT: usize = 10;

    /// Physical page number mask (44 bits), already shifted into place.
    const PPN_MASK: usize = ((1 << 44) - 1) << Self::PPN_SHIFT;

    /// Creates a new entry pointing at `frame` with the given flags.
    ///
    /// The valid bit is not implied; callers add [`PageFlags::VALID`] themselves.
    pub const fn new(frame: FrameNumber, flags: PageFlags) -> Self {
        let ppn = (frame.as_usize() << Self::PPN_SHIFT) & Self::PPN_MASK;
        Self(ppn | flags.to_raw())
    }

    /// Creates an entry pointing at a child table.
    pub const fn table(frame: FrameNumber) -> Self {
        Self::new(frame, PageFlags::VALID)
    }

    /// Returns the frame this entry points to, whether or not it is valid.
    pub const fn frame(self) -> FrameNumber {
        FrameNumber::new((self.0 & Self::PPN_MASK) >> Self::PPN_SHIFT)
    }

    /// Returns the flags for this entry.
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0)
    }

    /// Sets the flags for this entry, preserving the target frame.
    pub fn set_flags(&mut self, flags: PageFlags) {
        self.0 = (self.0 & Self::PPN_MASK) | flags.to_raw();
    }

    /// Returns whether this entry is valid.
    pub const fn is_valid(self) -> bool {
        self.flags().is_valid()
    }

    /// Returns whether this entry is a leaf (maps a data frame).
    pub const fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().has_access()
    }

    /// Returns whether this entry points at the next level of the table.
    pub const fn is_table(self) -> bool {
        self.is_valid() && !self.flags().has_access()
    }

    /// Clears this entry (sets it to zero).
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw usize value of this entry.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Creates an entry from a raw usize value.
    pub const fn from_usize(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageEntry({:#x}, {:?})", self.frame().start().as_usize(), self.flags())
    }
}
