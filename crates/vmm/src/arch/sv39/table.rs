//! Page table structure for Sv39.

use super::{ENTRY_COUNT, PAGE_SIZE, entry::PageEntry};

/// A single Sv39 page table: one frame worth of entries.
///
/// Roots, intermediate tables and leaf tables share this layout; only the flags of
/// the entries tell them apart.
#[derive(Clone)]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
}

const _: () = assert!(core::mem::size_of::<PageTable>() == PAGE_SIZE);

impl PageTable {
    /// Creates a new, empty page table.
    ///
    /// All entries are initialized to zero (not valid).
    pub const fn new() -> Self {
        Self {
            entries: [PageEntry::from_usize(0); ENTRY_COUNT],
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        self.entries[index]
    }

    /// Returns a mutable reference to the entry at the given index.
    ///
    /// # Panics
    /// Panics if index >= 512.
    pub fn entry_mut(&mut self, index: usize) -> &mut PageEntry {
        assert!(index < ENTRY_COUNT, "page table index out of bounds");
        &mut self.entries[index]
    }

    /// Iterates over `(index, entry)` for every valid entry.
    pub fn valid_entries(&self) -> impl Iterator<Item = (usize, PageEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, entry)| entry.is_valid())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
