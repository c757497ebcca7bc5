//! Page table entry flags for Sv39.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

/// Page table entry flags for Sv39.
///
/// Occupies the low ten bits of an entry: eight hardware flags followed by the
/// two-bit RSW field, which the hardware ignores and software may use freely.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PageFlags(usize);

impl PageFlags {
    /// Valid bit (bit 0). Without it the hardware ignores every other bit.
    pub const VALID: Self = Self(1 << 0);

    /// Readable bit (bit 1).
    pub const READ: Self = Self(1 << 1);

    /// Writable bit (bit 2).
    pub const WRITE: Self = Self(1 << 2);

    /// Executable bit (bit 3).
    pub const EXECUTE: Self = Self(1 << 3);

    /// User-accessible bit (bit 4).
    pub const USER: Self = Self(1 << 4);

    /// Global mapping bit (bit 5).
    pub const GLOBAL: Self = Self(1 << 5);

    /// Accessed bit (bit 6), maintained by hardware.
    pub const ACCESSED: Self = Self(1 << 6);

    /// Dirty bit (bit 7), maintained by hardware.
    pub const DIRTY: Self = Self(1 << 7);

    /// Reserved-for-software field (bits 8-9).
    pub const RSW: Self = Self(0b11 << 8);

    /// Mask covering every flag bit.
    pub const MASK: usize = 0x3FF;

    /// Read + write, the permission set for ordinary data and device registers.
    pub const READ_WRITE: Self = Self(Self::READ.0 | Self::WRITE.0);

    /// Read + execute, the permission set for code.
    pub const READ_EXECUTE: Self = Self(Self::READ.0 | Self::EXECUTE.0);

    /// Read + write + execute + user, the permission set for process memory.
    pub const USER_RWX: Self =
        Self(Self::READ.0 | Self::WRITE.0 | Self::EXECUTE.0 | Self::USER.0);

    const LEAF_MASK: usize = Self::READ.0 | Self::WRITE.0 | Self::EXECUTE.0;

    /// Creates empty page flags (entry not valid).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates page flags from a raw value, dropping anything outside the flag field.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw & Self::MASK)
    }

    /// Returns the raw usize value of these flags.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Returns true if every bit in `other` is also set here.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns these flags with every bit in `other` cleared.
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Returns whether the valid bit is set.
    pub const fn is_valid(self) -> bool {
        self.contains(Self::VALID)
    }

    /// Returns whether the user-accessible bit is set.
    pub const fn is_user(self) -> bool {
        self.contains(Self::USER)
    }

    /// Returns whether any of read, write or execute is set.
    ///
    /// Entries with none of them point at the next level of the table.
    pub const fn has_access(self) -> bool {
        self.0 & Self::LEAF_MASK != 0
    }
}

impl BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PageFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(PageFlags, char); 8] = [
            (PageFlags::DIRTY, 'd'),
            (PageFlags::ACCESSED, 'a'),
            (PageFlags::GLOBAL, 'g'),
            (PageFlags::USER, 'u'),
            (PageFlags::EXECUTE, 'x'),
            (PageFlags::WRITE, 'w'),
            (PageFlags::READ, 'r'),
            (PageFlags::VALID, 'v'),
        ];

        for (flag, name) in NAMES {
            let c = if self.contains(flag) { name } else { '-' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}
