//! Physical and virtual address newtypes.
//!
//! Both wrap a `usize`. A physical address is checked against the 56-bit Sv39
//! physical width when it is built; a virtual address can hold any value and is only
//! checked against [`MAX_VA`](crate::MAX_VA) when it reaches the table walker.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, arch};

/// Shared arithmetic and formatting for the two address types.
macro_rules! address_ops {
    ($name:ident) => {
        impl $name {
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns true if the address is a multiple of `align`, a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                debug_assert!(align.is_power_of_two());
                self.0 & (align - 1) == 0
            }

            /// Rounds down to a multiple of `align`, a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                debug_assert!(align.is_power_of_two());
                Self(self.0 & !(align - 1))
            }

            /// Returns the byte offset inside the 4 KiB page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % arch::PAGE_SIZE
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, bytes: usize) -> Self {
                Self::new(self.0 + bytes)
            }
        }

        /// Distance in bytes between two addresses.
        impl Sub for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: Self) -> usize {
                self.0 - rhs.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

/// An address in physical memory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

address_ops!(PhysicalAddress);

impl PhysicalAddress {
    /// Wraps a raw physical address.
    ///
    /// # Panics
    ///
    /// Panics if the address does not fit in the 56-bit Sv39 physical width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Returns the frame containing this address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 / arch::PAGE_SIZE)
    }
}

/// An address in a virtual address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

address_ops!(VirtualAddress);

impl VirtualAddress {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns true if the page tables can translate this address.
    #[inline]
    pub const fn is_valid(self) -> bool {
        arch::validate_virtual(self.0)
    }

    /// Returns the table index for this address at `level` (0 is the leaf table).
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }
}
