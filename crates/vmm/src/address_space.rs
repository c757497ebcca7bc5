//! Address space management.
//!
//! This module provides the per-process address space: a user table and its kernel
//! mirror, kept in step by [`DualTable`], together with the size of the process
//! image that starts at virtual address zero.

use crate::{
    MapError, PageDirectory, PhysicalMemory, VirtualAddress,
    arch::{self, PAGE_SIZE, PageFlags, TranslationControl},
    dual_table::DualTable,
    fault::{self, Fault},
    kernel_map::{self, MapScope},
    layout::MemoryLayout,
};

/// The memory of one process.
///
/// User memory is the contiguous range `[0, size)`. Every user page is also mapped,
/// without the user bit, in the mirror table the kernel runs on while serving this
/// process.
#[derive(Debug)]
pub struct AddressSpace {
    tables: DualTable,
    /// Bytes of user memory, starting at virtual address zero.
    size: usize,
}

impl AddressSpace {
    /// Creates an empty address space: no user memory, and a mirror holding the
    /// per-process kernel direct map.
    pub fn new(mem: &mut impl PhysicalMemory, layout: &MemoryLayout) -> Result<Self, MapError> {
        let user = PageDirectory::create_empty(mem)?;
        let mirror = match PageDirectory::create_empty(mem) {
            Ok(mirror) => mirror,
            Err(err) => {
                user.destroy(mem, 0);
                return Err(err);
            }
        };

        if let Err(err) = kernel_map::build_kernel_map(&mirror, mem, layout, MapScope::Process) {
            log::warn!("address space: kernel map failed: {err}");
            mirror.destroy_mirror(mem);
            user.destroy(mem, 0);
            return Err(err);
        }

        log::debug!(
            "address space: user {} mirror {}",
            user.root().start(),
            mirror.root().start()
        );
        Ok(Self::from_tables(DualTable::new(
            user,
            mirror,
            layout.effective_mirror_limit(),
        )))
    }

    /// Wraps existing tables as an empty address space.
    pub fn from_tables(tables: DualTable) -> Self {
        Self { tables, size: 0 }
    }

    /// Returns the size of user memory in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the user table and mirror pair.
    pub fn tables(&self) -> &DualTable {
        &self.tables
    }

    /// Returns the user table.
    pub fn user(&self) -> &PageDirectory {
        self.tables.user()
    }

    /// Returns the kernel mirror table.
    pub fn mirror(&self) -> &PageDirectory {
        self.tables.mirror()
    }

    /// Loads the first process's image into a single page at address zero.
    ///
    /// The image is copied to the start of the page and the rest is zero. The page
    /// is readable, writable and executable from user mode.
    ///
    /// # Faults
    /// Raises [`Fault::ImageTooLarge`] unless the image is smaller than a page.
    pub fn init_first_process(
        &mut self,
        mem: &mut impl PhysicalMemory,
        image: &[u8],
    ) -> Result<(), MapError> {
        if image.len() >= PAGE_SIZE {
            fault::raise(Fault::ImageTooLarge(image.len()));
        }

        let frame = mem.allocate_zeroed().ok_or(MapError::OutOfMemory)?;
        mem.frame_mut(frame).bytes_mut()[..image.len()].copy_from_slice(image);

        self.tables.map(
            mem,
            VirtualAddress::new(0),
            PAGE_SIZE,
            frame.start(),
            PageFlags::USER_RWX,
        )?;
        self.size = PAGE_SIZE;

        log::debug!("address space: loaded {} byte init image", image.len());
        Ok(())
    }

    /// Grows user memory to `new_size` bytes with zeroed pages.
    ///
    /// Returns the new size. If any page cannot be added, every page added by this
    /// call is removed again and the size is unchanged.
    pub fn grow(&mut self, mem: &mut impl PhysicalMemory, new_size: usize) -> Result<usize, MapError> {
        if new_size <= self.size {
            return Ok(self.size);
        }

        let start = arch::page_round_up(self.size);
        let mut va = start;
        while va < new_size {
            let result = match mem.allocate_zeroed() {
                Some(frame) => self.tables.map(
                    mem,
                    VirtualAddress::new(va),
                    PAGE_SIZE,
                    frame.start(),
                    PageFlags::USER_RWX,
                ),
                None => Err(MapError::OutOfMemory),
            };

            if let Err(err) = result {
                log::warn!(
                    "address space: grow {:#x} -> {new_size:#x} failed at {va:#x}: {err}",
                    self.size
                );
                self.tables
                    .unmap(mem, VirtualAddress::new(start), (va - start) / PAGE_SIZE, true);
                return Err(err);
            }
            va += PAGE_SIZE;
        }

        log::trace!("address space: grew {:#x} -> {new_size:#x}", self.size);
        self.size = new_size;
        Ok(new_size)
    }

    /// Shrinks user memory to `new_size` bytes, releasing the pages past it.
    ///
    /// Returns the new size. Growing through this call is a no-op.
    pub fn shrink(&mut self, mem: &mut impl PhysicalMemory, new_size: usize) -> usize {
        if new_size >= self.size {
            return self.size;
        }

        let from = arch::page_round_up(new_size);
        let to = arch::page_round_up(self.size);
        if from < to {
            self.tables
                .unmap(mem, VirtualAddress::new(from), (to - from) / PAGE_SIZE, true);
        }

        log::trace!("address space: shrank {:#x} -> {new_size:#x}", self.size);
        self.size = new_size;
        new_size
    }

    /// Copies all of user memory into `dst`, which must be empty.
    ///
    /// Each page gets a fresh frame with the same contents and flags. If any page
    /// cannot be copied, `dst` is emptied again.
    ///
    /// # Faults
    /// Raises [`Fault::NotMapped`] if a page below the size is missing here.
    pub fn duplicate(
        &self,
        mem: &mut impl PhysicalMemory,
        dst: &mut AddressSpace,
    ) -> Result<(), MapError> {
        debug_assert_eq!(dst.size, 0, "duplicate into a non-empty address space");

        let mut va = 0;
        while va < self.size {
            let page = VirtualAddress::new(va);
            let Some(entry) = self
                .user()
                .locate(mem, page)
                .map(|slot| slot.read(mem))
                .filter(|entry| entry.is_valid())
            else {
                fault::raise(Fault::NotMapped(page));
            };

            let result = match mem.allocate_frame() {
                Some(frame) => {
                    mem.copy_frame(frame, entry.frame());
                    dst.tables
                        .map(mem, page, PAGE_SIZE, frame.start(), entry.flags())
                }
                None => Err(MapError::OutOfMemory),
            };

            if let Err(err) = result {
                log::warn!("address space: duplicate failed at {page}: {err}");
                dst.tables
                    .unmap(mem, VirtualAddress::new(0), va / PAGE_SIZE, true);
                return Err(err);
            }
            va += PAGE_SIZE;
        }

        dst.size = self.size;
        log::debug!("address space: duplicated {:#x} bytes", self.size);
        Ok(())
    }

    /// Makes the mirror the active table on this hart.
    pub fn install(&self, mmu: &mut impl TranslationControl) {
        kernel_map::install(self.mirror(), mmu);
    }

    /// Releases all user memory and every table of both the user table and mirror.
    pub fn destroy(self, mem: &mut impl PhysicalMemory) {
        let size = self.size;
        let (user, mirror) = self.tables.into_parts();
        mirror.destroy_mirror(mem);
        user.destroy(mem, size);
        log::debug!("address space: destroyed ({size:#x} bytes)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        EmulatedMemory, EmulatedMmu, PhysicalAddress, Privilege,
        layout::{KERNBASE, PLIC, UART0},
    };

    fn layout() -> MemoryLayout {
        MemoryLayout::qemu_virt(
            PhysicalAddress::new(KERNBASE + 0x8000),
            PhysicalAddress::new(KERNBASE + 0x7000),
        )
    }

    /// An address space with empty tables, so allocation counts are easy to follow.
    fn bare(mem: &mut EmulatedMemory) -> AddressSpace {
        let user = PageDirectory::create_empty(mem).unwrap();
        let mirror = PageDirectory::create_empty(mem).unwrap();
        AddressSpace::from_tables(DualTable::new(user, mirror, VirtualAddress::new(PLIC)))
    }

    fn read_byte(mem: &EmulatedMemory, space: &AddressSpace, va: usize) -> u8 {
        let pa = space
            .user()
            .resolve_user(mem, VirtualAddress::new(va))
            .unwrap();
        mem.frame(pa.frame_number()).bytes()[va % PAGE_SIZE]
    }

    #[test]
    fn new_builds_process_kernel_map() {
        let mut mem = EmulatedMemory::new(128);
        let space = AddressSpace::new(&mut mem, &layout()).unwrap();

        assert_eq!(space.size(), 0);
        assert_eq!(space.user().mapped_pages(&mem), 0);
        assert!(space
            .mirror()
            .translate(&mem, VirtualAddress::new(UART0))
            .is_some());
        assert_eq!(space.tables().limit(), VirtualAddress::new(PLIC));

        space.destroy(&mut mem);
        assert_eq!(mem.in_use(), 0);
    }

    #[test]
    fn raised_mirror_limit_stops_below_devices() {
        let mut mem = EmulatedMemory::new(128);
        let layout = layout().with_mirror_limit(VirtualAddress::new(0x4000_0000));
        let space = AddressSpace::new(&mut mem, &layout).unwrap();
        assert_eq!(space.tables().limit(), VirtualAddress::new(PLIC));

        let frame = mem.allocate_zeroed().unwrap();
        let uart = VirtualAddress::new(UART0);
        let result = space.tables().map(
            &mut mem,
            uart,
            PAGE_SIZE,
            frame.start(),
            PageFlags::USER_RWX,
        );

        assert_eq!(result, Err(MapError::MirrorLimit));
        assert!(!mem.is_allocated(frame));
        assert_eq!(space.user().translate(&mem, uart), None);
        assert!(space.mirror().translate(&mem, uart).is_some());

        space.destroy(&mut mem);
        assert_eq!(mem.in_use(), 0);
    }

    #[test]
    fn mirror_limit_field_is_clipped_on_new() {
        let mut mem = EmulatedMemory::new(128);
        let mut layout = layout();
        layout.mirror_limit = VirtualAddress::new(0x4000_0000);

        let space = AddressSpace::new(&mut mem, &layout).unwrap();
        assert_eq!(space.tables().limit(), VirtualAddress::new(PLIC));

        space.destroy(&mut mem);
    }

    #[test]
    fn new_rolls_back_on_exhaustion() {
        let mut mem = EmulatedMemory::new(128);
        mem.fail_after(10);

        assert_eq!(
            AddressSpace::new(&mut mem, &layout()).unwrap_err(),
            MapError::OutOfMemory
        );
        assert_eq!(mem.in_use(), 0);
    }

    #[test]
    fn init_first_process_copies_image() {
        let mut mem = EmulatedMemory::new(16);
        let mut space = bare(&mut mem);
        let image: [u8; 17] = [
            0x13, 0x05, 0x00, 0x00, 0x93, 0x05, 0x00, 0x00, 0x93, 0x08, 0x60, 0x00, 0x73,
            0x00, 0x00, 0x00, 0xef,
        ];

        space.init_first_process(&mut mem, &image).unwrap();
        assert_eq!(space.size(), PAGE_SIZE);

        let pa = space
            .user()
            .resolve_user(&mem, VirtualAddress::new(0))
            .unwrap();
        let bytes = mem.frame(pa.frame_number()).bytes();
        assert_eq!(&bytes[..17], &image);
        assert!(bytes[17..].iter().all(|&b| b == 0));
        assert_eq!(bytes.len() - 17, 4079);

        let in_use = mem.in_use();
        let (user, mirror) = space.tables.into_parts();
        mirror.destroy_mirror(&mut mem);
        let tables_freed = in_use - mem.in_use();
        user.destroy(&mut mem, PAGE_SIZE);
        // One data frame plus the user table's three nodes.
        assert_eq!(in_use - mem.in_use() - tables_freed, 4);
        assert!(!mem.is_allocated(pa.frame_number()));
    }

    #[test]
    #[should_panic(expected = "exceeds one page")]
    fn init_first_process_rejects_full_page() {
        let mut mem = EmulatedMemory::new(16);
        let mut space = bare(&mut mem);
        let _ = space.init_first_process(&mut mem, &[0; PAGE_SIZE]);
    }

    #[test]
    fn grow_maps_zeroed_pages() {
        let mut mem = EmulatedMemory::new(32);
        let mut space = bare(&mut mem);

        assert_eq!(space.grow(&mut mem, 3 * PAGE_SIZE + 1), Ok(3 * PAGE_SIZE + 1));
        for va in (0..4 * PAGE_SIZE).step_by(PAGE_SIZE) {
            let pa = space
                .user()
                .resolve_user(&mem, VirtualAddress::new(va))
                .unwrap();
            assert!(mem.frame(pa.frame_number()).bytes().iter().all(|&b| b == 0));
        }
        assert_eq!(space.user().mapped_pages(&mem), 4);
        assert_eq!(space.mirror().mapped_pages(&mem), 4);

        // Already large enough.
        assert_eq!(space.grow(&mut mem, PAGE_SIZE), Ok(3 * PAGE_SIZE + 1));
    }

    #[test]
    fn grow_then_shrink_to_zero() {
        let mut mem = EmulatedMemory::new(32);
        let mut space = bare(&mut mem);
        let fresh = mem.in_use();

        space.grow(&mut mem, 5 * PAGE_SIZE).unwrap();
        assert_eq!(space.shrink(&mut mem, 2 * PAGE_SIZE), 2 * PAGE_SIZE);
        assert_eq!(space.user().mapped_pages(&mem), 2);
        assert_eq!(space.shrink(&mut mem, 0), 0);

        assert_eq!(space.user().mapped_pages(&mem), 0);
        assert_eq!(space.mirror().mapped_pages(&mem), 0);
        // Intermediate tables stay; every data frame is back.
        assert_eq!(mem.in_use(), fresh + 4);

        // Shrinking can never grow.
        assert_eq!(space.shrink(&mut mem, PAGE_SIZE), 0);
    }

    #[test]
    fn grow_fails_on_third_allocation() {
        let mut mem = EmulatedMemory::new(32);
        let mut space = bare(&mut mem);
        let fresh = mem.in_use();

        // Data frame, then the user table's level-1 node; the level-0 node fails.
        mem.fail_after(2);
        assert_eq!(
            space.grow(&mut mem, 3 * PAGE_SIZE),
            Err(MapError::OutOfMemory)
        );

        assert_eq!(space.size(), 0);
        assert_eq!(space.user().mapped_pages(&mem), 0);
        assert_eq!(space.mirror().mapped_pages(&mem), 0);
        assert_eq!(mem.in_use(), fresh + 1);
    }

    #[test]
    fn grow_failure_midway_removes_added_pages() {
        let mut mem = EmulatedMemory::new(32);
        let mut space = bare(&mut mem);
        space.grow(&mut mem, PAGE_SIZE).unwrap();

        // Two more pages fit; the third does not.
        mem.fail_after(2);
        assert_eq!(
            space.grow(&mut mem, 4 * PAGE_SIZE),
            Err(MapError::OutOfMemory)
        );

        assert_eq!(space.size(), PAGE_SIZE);
        assert_eq!(space.user().mapped_pages(&mem), 1);
        assert_eq!(space.mirror().mapped_pages(&mem), 1);
    }

    #[test]
    fn duplicate_is_independent() {
        let mut mem = EmulatedMemory::new(32);
        let mut parent = bare(&mut mem);
        let mut child = bare(&mut mem);
        parent.grow(&mut mem, 2 * PAGE_SIZE).unwrap();
        parent.user().clear_user(&mut mem, VirtualAddress::new(0));

        let parent_pa = parent
            .user()
            .resolve_user(&mem, VirtualAddress::new(PAGE_SIZE))
            .unwrap();
        mem.frame_mut(parent_pa.frame_number()).bytes_mut()[7] = 0x42;

        parent.duplicate(&mut mem, &mut child).unwrap();
        assert_eq!(child.size(), 2 * PAGE_SIZE);
        assert_eq!(read_byte(&mem, &child, PAGE_SIZE + 7), 0x42);

        mem.frame_mut(parent_pa.frame_number()).bytes_mut()[7] = 0x99;
        assert_eq!(read_byte(&mem, &child, PAGE_SIZE + 7), 0x42);

        // Flags carry over, including the guard page's missing user bit.
        assert_eq!(
            child.user().resolve_user(&mem, VirtualAddress::new(0)),
            None
        );
        assert!(child
            .mirror()
            .translate(&mem, VirtualAddress::new(0))
            .is_some());
    }

    #[test]
    fn duplicate_failure_leaves_destination_empty() {
        let mut mem = EmulatedMemory::new(32);
        let mut parent = bare(&mut mem);
        let mut child = bare(&mut mem);
        parent.grow(&mut mem, 3 * PAGE_SIZE).unwrap();
        let before = mem.in_use();

        // First page: frame plus four table nodes. Second page: one frame. The
        // third page's frame is refused.
        mem.fail_after(6);
        assert_eq!(
            parent.duplicate(&mut mem, &mut child),
            Err(MapError::OutOfMemory)
        );

        assert_eq!(child.size(), 0);
        assert_eq!(child.user().mapped_pages(&mem), 0);
        assert_eq!(child.mirror().mapped_pages(&mem), 0);
        assert_eq!(mem.in_use(), before + 4);
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn duplicate_with_missing_page_faults() {
        let mut mem = EmulatedMemory::new(32);
        let mut parent = bare(&mut mem);
        let mut child = bare(&mut mem);
        parent.grow(&mut mem, 2 * PAGE_SIZE).unwrap();
        parent
            .tables()
            .unmap(&mut mem, VirtualAddress::new(PAGE_SIZE), 1, true);

        let _ = parent.duplicate(&mut mem, &mut child);
    }

    #[test]
    fn destroy_returns_every_frame() {
        let mut mem = EmulatedMemory::new(128);
        let mut space = AddressSpace::new(&mut mem, &layout()).unwrap();
        space.init_first_process(&mut mem, &[1, 2, 3]).unwrap();
        space.grow(&mut mem, 5 * PAGE_SIZE).unwrap();
        let user_root = space.user().root();
        let mirror_root = space.mirror().root();

        space.destroy(&mut mem);

        assert_eq!(mem.in_use(), 0);
        assert_eq!(mem.table(user_root).valid_entries().count(), 0);
        assert_eq!(mem.table(mirror_root).valid_entries().count(), 0);
    }

    #[test]
    fn installed_mirror_reaches_user_memory_from_the_kernel() {
        let mut mem = EmulatedMemory::new(128);
        let mut space = AddressSpace::new(&mut mem, &layout()).unwrap();
        space.init_first_process(&mut mem, &[0x5a]).unwrap();

        let mut mmu = EmulatedMmu::new();
        space.install(&mut mmu);

        assert_eq!(mmu.load(&mem, 0, Privilege::Supervisor), Some(0x5a));
        assert!(mmu.store(&mut mem, 1, Privilege::Supervisor, 0x5b));
        assert_eq!(read_byte(&mem, &space, 1), 0x5b);
        // The mirror has no user-mode mappings.
        assert_eq!(mmu.load(&mem, 0, Privilege::User), None);
    }
}
