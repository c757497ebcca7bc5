//! RISC-V Sv39 paging format.
//!
//! Sv39 translates 39-bit virtual addresses through three levels of page tables:
//! - Level 2: bits 30-38 (root)
//! - Level 1: bits 21-29
//! - Level 0: bits 12-20 (leaf table)
//! - Bits 0-11 select the byte inside a 4 KiB page.
//!
//! Every table is one 4 KiB frame holding 512 eight-byte entries. The same format is
//! used by the hardware backend and by the software emulation, so the page-table
//! code never needs to know which one it is running on.

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use table::PageTable;

/// Number of bits in a page offset.
pub const PAGE_SHIFT: usize = 12;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Number of bits used to index a single page table.
pub const INDEX_BITS: usize = 9;

/// Number of entries in a page table (2^9).
pub const ENTRY_COUNT: usize = 1 << INDEX_BITS;

/// Number of page table levels (3 levels: level 2, 1, 0).
pub const PAGE_TABLE_LEVELS: usize = 3;

/// One beyond the highest virtual address the page tables accept.
///
/// This is one bit less than Sv39 allows, which avoids having to sign-extend
/// virtual addresses that have the high bit set.
pub const MAX_VA: usize = 1 << (INDEX_BITS * PAGE_TABLE_LEVELS + PAGE_SHIFT - 1);

/// Maximum number of bits in a physical address (Sv39 PPNs are 44 bits wide).
pub const MAX_PHYSICAL_BITS: usize = 56;

/// Returns the page table index for a given virtual address at the specified level.
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    assert!(level < PAGE_TABLE_LEVELS, "level out of range for Sv39 (0-2)");
    let shift = PAGE_SHIFT + level * INDEX_BITS;
    (address >> shift) & (ENTRY_COUNT - 1)
}

/// Validates a physical address for Sv39.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr < (1 << MAX_PHYSICAL_BITS)
}

/// Validates a virtual address against [`MAX_VA`].
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    addr < MAX_VA
}

/// Rounds a byte count or address up to the next page boundary.
#[inline]
pub const fn page_round_up(value: usize) -> usize {
    (value + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Rounds a byte count or address down to a page boundary.
#[inline]
pub const fn page_round_down(value: usize) -> usize {
    value & !(PAGE_SIZE - 1)
}

/// The `satp` MODE field value selecting Sv39.
pub const SATP_SV39: usize = 8 << 60;

/// Builds the `satp` register value for a root table frame.
#[inline]
pub const fn make_satp(root_frame: usize) -> usize {
    SATP_SV39 | root_frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_index_per_level() {
        // level 2 = 1, level 1 = 2, level 0 = 3, offset = 0x45
        let addr = (1 << 30) | (2 << 21) | (3 << 12) | 0x45;

        assert_eq!(page_index(addr, 2), 1);
        assert_eq!(page_index(addr, 1), 2);
        assert_eq!(page_index(addr, 0), 3);
    }

    #[test]
    fn page_index_saturated() {
        let addr = MAX_VA - 1;
        assert_eq!(page_index(addr, 2), 0xFF);
        assert_eq!(page_index(addr, 1), 0x1FF);
        assert_eq!(page_index(addr, 0), 0x1FF);
    }

    #[test]
    #[should_panic(expected = "level out of range")]
    fn page_index_rejects_level_three() {
        page_index(0, 3);
    }

    #[test]
    fn max_va_is_256_gib() {
        assert_eq!(MAX_VA, 0x40_0000_0000);
        assert!(validate_virtual(MAX_VA - 1));
        assert!(!validate_virtual(MAX_VA));
    }

    #[test]
    fn rounding() {
        assert_eq!(page_round_up(0), 0);
        assert_eq!(page_round_up(1), PAGE_SIZE);
        assert_eq!(page_round_up(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_round_down(PAGE_SIZE + 17), PAGE_SIZE);
    }

    #[test]
    fn satp_encoding() {
        assert_eq!(make_satp(0x80000), 0x8000_0000_0008_0000);
    }
}
