//! Page table management for a single Sv39 table tree.
//!
//! This module provides the `PageDirectory` type, which names the root frame of a
//! page table tree and provides the operations for walking it, mapping and unmapping
//! pages, translating addresses and finally tearing the tree down.
//!
//! A `PageDirectory` holds no memory itself. Every operation takes the
//! [`PhysicalMemory`] the tree lives in, and all references between tables are frame
//! numbers stored in the entries.

use crate::{
    FrameNumber, MapError, PhysicalAddress, PhysicalMemory, VirtualAddress,
    arch::{self, PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags},
    dump::TableDump,
    fault::{self, Fault},
};

/// The location of one entry: a table frame and an index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlot {
    table: FrameNumber,
    index: usize,
}

impl EntrySlot {
    /// Returns the frame of the table holding this slot.
    pub const fn table(self) -> FrameNumber {
        self.table
    }

    /// Returns the index of this slot inside its table.
    pub const fn index(self) -> usize {
        self.index
    }

    /// Reads the entry stored in this slot.
    pub fn read(self, mem: &impl PhysicalMemory) -> PageEntry {
        mem.table(self.table).entry(self.index)
    }

    /// Overwrites the entry stored in this slot.
    pub fn write(self, mem: &mut impl PhysicalMemory, entry: PageEntry) {
        *mem.table_mut(self.table).entry_mut(self.index) = entry;
    }
}

/// Returns how many pages the byte range `[va, va + size)` touches.
pub(crate) const fn pages_spanned(va: usize, size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let first = arch::page_round_down(va);
    let last = arch::page_round_down(va + size - 1);
    (last - first) / PAGE_SIZE + 1
}

/// A page table tree, identified by its root frame.
///
/// This type owns the root table and provides operations for mapping and unmapping
/// virtual addresses to physical addresses. It handles walking the page table
/// hierarchy and allocating intermediate tables as needed.
#[derive(Debug, PartialEq, Eq)]
pub struct PageDirectory {
    /// The root (level 2) table.
    root: FrameNumber,
}

impl PageDirectory {
    /// Creates a page directory with an empty root table.
    pub fn create_empty(mem: &mut impl PhysicalMemory) -> Result<Self, MapError> {
        let root = mem.allocate_zeroed().ok_or(MapError::OutOfMemory)?;
        log::debug!("created page table at {}", root.start());
        Ok(Self { root })
    }

    /// Returns the root table frame.
    pub const fn root(&self) -> FrameNumber {
        self.root
    }

    /// Returns the `satp` value that selects this table in Sv39 mode.
    pub const fn satp(&self) -> usize {
        arch::make_satp(self.root.as_usize())
    }

    /// Walks the page table hierarchy to find the leaf slot for a virtual address.
    ///
    /// Returns None if any intermediate table is not present. The returned slot may
    /// itself still be invalid.
    pub fn locate(&self, mem: &impl PhysicalMemory, va: VirtualAddress) -> Option<EntrySlot> {
        if !va.is_valid() {
            fault::raise(Fault::AddressOutOfRange(va));
        }

        let mut table = self.root;

        // Walk through all levels except the last
        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let entry = mem.table(table).entry(va.page_index(level));
            if !entry.is_valid() {
                return None;
            }
            table = entry.frame();
        }

        Some(EntrySlot {
            table,
            index: va.page_index(0),
        })
    }

    /// Walks the page table hierarchy, creating intermediate tables as needed.
    ///
    /// Fails only if a new table could not be allocated; tables created before the
    /// failure stay in place, empty.
    pub fn locate_or_create(
        &self,
        mem: &mut impl PhysicalMemory,
        va: VirtualAddress,
    ) -> Result<EntrySlot, MapError> {
        if !va.is_valid() {
            fault::raise(Fault::AddressOutOfRange(va));
        }

        let mut table = self.root;

        for level in (1..PAGE_TABLE_LEVELS).rev() {
            let index = va.page_index(level);
            let entry = mem.table(table).entry(index);

            table = if entry.is_valid() {
                entry.frame()
            } else {
                let child = mem.allocate_zeroed().ok_or(MapError::OutOfMemory)?;
                *mem.table_mut(table).entry_mut(index) = PageEntry::table(child);
                log::trace!("level {level} table at {} for {va}", child.start());
                child
            };
        }

        Ok(EntrySlot {
            table,
            index: va.page_index(0),
        })
    }

    /// Maps the pages covering `[va, va + size)` to consecutive frames starting at `pa`.
    ///
    /// Neither `va` nor `size` needs to be page-aligned; every page touched by the
    /// range is mapped. The valid bit is added to `flags`.
    ///
    /// On `Err`, pages mapped earlier in this call remain mapped; the caller is
    /// responsible for removing them.
    ///
    /// # Faults
    /// Raises [`Fault::Remap`] if a page is already mapped and [`Fault::EmptyMapping`]
    /// if `size` is zero.
    pub fn map_range(
        &self,
        mem: &mut impl PhysicalMemory,
        va: VirtualAddress,
        size: usize,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        if size == 0 {
            fault::raise(Fault::EmptyMapping(va));
        }

        let mut page = va.align_down(PAGE_SIZE);
        let last = (va + (size - 1)).align_down(PAGE_SIZE);
        let mut frame = pa.frame_number();

        loop {
            let slot = self.locate_or_create(mem, page)?;
            if slot.read(mem).is_valid() {
                fault::raise(Fault::Remap(page));
            }
            slot.write(mem, PageEntry::new(frame, flags | PageFlags::VALID));

            if page == last {
                break;
            }
            page = page + PAGE_SIZE;
            frame = frame + 1;
        }

        log::trace!("mapped {va}+{size:#x} -> {pa} ({flags:?})");
        Ok(())
    }

    /// Removes `page_count` page mappings starting at `va`, optionally releasing the
    /// mapped frames to the allocator.
    ///
    /// # Faults
    /// Raises [`Fault::Unaligned`] if `va` is not page-aligned, and
    /// [`Fault::MissingTable`], [`Fault::NotMapped`] or [`Fault::NotLeaf`] if any page
    /// in the range is not a mapped leaf.
    pub fn unmap_range(
        &self,
        mem: &mut impl PhysicalMemory,
        va: VirtualAddress,
        page_count: usize,
        release: bool,
    ) {
        if !va.is_aligned(PAGE_SIZE) {
            fault::raise(Fault::Unaligned(va));
        }

        for page in (0..page_count).map(|i| va + i * PAGE_SIZE) {
            let Some(slot) = self.locate(mem, page) else {
                fault::raise(Fault::MissingTable(page));
            };

            let entry = slot.read(mem);
            if !entry.is_valid() {
                fault::raise(Fault::NotMapped(page));
            }
            if entry.is_table() {
                fault::raise(Fault::NotLeaf(page));
            }

            if release {
                mem.release_frame(entry.frame());
            }
            slot.write(mem, PageEntry::default());
        }

        log::trace!("unmapped {page_count} pages at {va} (release: {release})");
    }

    /// Removes whichever of the `page_count` pages starting at `va` are mapped,
    /// without releasing their frames. Returns how many were removed.
    ///
    /// Used to roll back a [`map_range`](Self::map_range) that failed part-way.
    pub(crate) fn unmap_present(
        &self,
        mem: &mut impl PhysicalMemory,
        va: VirtualAddress,
        page_count: usize,
    ) -> usize {
        let mut removed = 0;
        for page in (0..page_count).map(|i| va + i * PAGE_SIZE) {
            if let Some(slot) = self.locate(mem, page) {
                if slot.read(mem).is_leaf() {
                    slot.write(mem, PageEntry::default());
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Looks up the frame and flags a virtual address is mapped to.
    ///
    /// Returns None for addresses beyond [`MAX_VA`](crate::MAX_VA) and for unmapped
    /// addresses. Never faults.
    pub fn translate(
        &self,
        mem: &impl PhysicalMemory,
        va: VirtualAddress,
    ) -> Option<(PhysicalAddress, PageFlags)> {
        if !va.is_valid() {
            return None;
        }

        let entry = self.locate(mem, va)?.read(mem);
        entry.is_leaf().then(|| (entry.frame().start(), entry.flags()))
    }

    /// Resolves a user virtual address to the physical address of its page.
    ///
    /// Only user-accessible leaves count. This is the check for pointers handed in by
    /// user processes, so it reports "not found" instead of faulting.
    pub fn resolve_user(&self, mem: &impl PhysicalMemory, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.translate(mem, va) {
            Some((pa, flags)) if flags.is_user() => Some(pa),
            _ => None,
        }
    }

    /// Resolves a kernel virtual address, including its page offset.
    ///
    /// # Faults
    /// Raises [`Fault::NotMapped`] if the address is not mapped; kernel callers only
    /// ask about addresses they know to be mapped.
    pub fn resolve_kernel(&self, mem: &impl PhysicalMemory, va: VirtualAddress) -> PhysicalAddress {
        let Some(slot) = self.locate(mem, va) else {
            fault::raise(Fault::NotMapped(va));
        };
        let entry = slot.read(mem);
        if !entry.is_valid() {
            fault::raise(Fault::NotMapped(va));
        }
        entry.frame().start() + va.page_offset()
    }

    /// Revokes user access to a mapped page, keeping it mapped for the kernel.
    ///
    /// Used for the guard page below a user stack.
    ///
    /// # Faults
    /// Raises [`Fault::MissingTable`] if no table covers `va`.
    pub fn clear_user(&self, mem: &mut impl PhysicalMemory, va: VirtualAddress) {
        let Some(slot) = self.locate(mem, va) else {
            fault::raise(Fault::MissingTable(va));
        };
        let mut entry = slot.read(mem);
        entry.set_flags(entry.flags().without(PageFlags::USER));
        slot.write(mem, entry);
    }

    /// Counts the leaves mapped anywhere in the tree.
    pub fn mapped_pages(&self, mem: &impl PhysicalMemory) -> usize {
        fn count(mem: &impl PhysicalMemory, table: FrameNumber, level: usize) -> usize {
            mem.table(table)
                .valid_entries()
                .map(|(_, entry)| {
                    if entry.is_table() && level > 0 {
                        count(mem, entry.frame(), level - 1)
                    } else {
                        usize::from(entry.is_leaf())
                    }
                })
                .sum()
        }

        count(mem, self.root, PAGE_TABLE_LEVELS - 1)
    }

    /// Returns a value that renders the whole tree, one line per valid entry.
    pub fn dump<'a, M: PhysicalMemory>(&self, mem: &'a M) -> TableDump<'a, M> {
        TableDump::new(mem, self.root)
    }

    /// Unmaps and releases every page below `size`, then frees every table.
    ///
    /// # Faults
    /// Raises [`Fault::LiveLeaf`] if a leaf at or above `size` is still mapped, and the
    /// [`unmap_range`](Self::unmap_range) faults if a page below `size` is missing.
    pub fn destroy(self, mem: &mut impl PhysicalMemory, size: usize) {
        if size > 0 {
            self.unmap_range(
                mem,
                VirtualAddress::new(0),
                arch::page_round_up(size) / PAGE_SIZE,
                true,
            );
        }
        Self::free_tables(mem, self.root, PAGE_TABLE_LEVELS - 1);
        log::debug!("destroyed page table at {}", self.root.start());
    }

    /// Clears every entry and frees every table, without releasing mapped frames.
    ///
    /// This is the teardown for mirror tables, whose leaves point at frames owned by
    /// the user table or at fixed kernel and device memory.
    pub fn destroy_mirror(self, mem: &mut impl PhysicalMemory) {
        Self::clear_tables(mem, self.root, PAGE_TABLE_LEVELS - 1);
        log::debug!("destroyed mirror table at {}", self.root.start());
    }

    /// Frees `table` and every table below it. All leaves must already be gone.
    fn free_tables(mem: &mut impl PhysicalMemory, table: FrameNumber, level: usize) {
        for index in 0..arch::ENTRY_COUNT {
            let entry = mem.table(table).entry(index);
            if !entry.is_valid() {
                continue;
            }
            if level == 0 || !entry.is_table() {
                fault::raise(Fault::LiveLeaf { table, index });
            }

            Self::free_tables(mem, entry.frame(), level - 1);
            mem.table_mut(table).entry_mut(index).clear();
        }
        mem.release_frame(table);
    }

    /// Clears every valid entry below `table`, frees the tables, keeps the leaf frames.
    fn clear_tables(mem: &mut impl PhysicalMemory, table: FrameNumber, level: usize) {
        for index in 0..arch::ENTRY_COUNT {
            let entry = mem.table(table).entry(index);
            if !entry.is_valid() {
                continue;
            }
            if level > 0 {
                if !entry.is_table() {
                    fault::raise(Fault::LiveLeaf { table, index });
                }
                Self::clear_tables(mem, entry.frame(), level - 1);
            }
            mem.table_mut(table).entry_mut(index).clear();
        }
        mem.release_frame(table);
    }
}
