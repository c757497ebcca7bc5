//! A process's user table paired with its kernel mirror.
//!
//! Every process has two tables. The user table is what the process runs on. The
//! mirror is the kernel's view of the same process: the kernel direct map plus a copy
//! of every user mapping below the mirror limit, without the user bit, so the kernel
//! can dereference user pointers directly while running on the mirror.
//!
//! [`DualTable`] keeps the two in step. A change is applied to the user table first
//! and then to the mirror; if either step fails, both are put back the way they were.

use crate::{
    MapError, PageDirectory, PhysicalAddress, PhysicalMemory, VirtualAddress,
    arch::{PAGE_SIZE, PageFlags},
    page_directory::pages_spanned,
};

/// A user table and its kernel mirror, updated together.
#[derive(Debug)]
pub struct DualTable {
    user: PageDirectory,
    mirror: PageDirectory,
    limit: VirtualAddress,
}

impl DualTable {
    /// Pairs a user table with its mirror. Nothing at or above `limit` is ever
    /// mirrored.
    pub fn new(user: PageDirectory, mirror: PageDirectory, limit: VirtualAddress) -> Self {
        Self {
            user,
            mirror,
            limit,
        }
    }

    /// Returns the table the process runs on.
    pub fn user(&self) -> &PageDirectory {
        &self.user
    }

    /// Returns the kernel's view of the process.
    pub fn mirror(&self) -> &PageDirectory {
        &self.mirror
    }

    /// Returns the first address that is never mirrored.
    pub fn limit(&self) -> VirtualAddress {
        self.limit
    }

    /// Splits the pair back into the user table and the mirror.
    pub fn into_parts(self) -> (PageDirectory, PageDirectory) {
        (self.user, self.mirror)
    }

    /// Number of bytes of `[va, va + size)` that lie below the limit.
    fn mirrored_size(&self, va: VirtualAddress, size: usize) -> usize {
        if va >= self.limit {
            0
        } else {
            size.min(self.limit - va)
        }
    }

    /// Number of the `page_count` pages starting at `va` that start below the limit.
    fn mirrored_pages(&self, va: VirtualAddress, page_count: usize) -> usize {
        if va >= self.limit {
            0
        } else {
            page_count.min((self.limit - va).div_ceil(PAGE_SIZE))
        }
    }

    /// Maps `[va, va + size)` to frames starting at `pa` in the user table with
    /// `flags`, and the part below the limit in the mirror without the user bit.
    ///
    /// The frames backing the range belong to the address space from this call on.
    /// If the mapping fails, every page this call installed is removed from both
    /// tables and the frames are released.
    pub fn map(
        &self,
        mem: &mut impl PhysicalMemory,
        va: VirtualAddress,
        size: usize,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let pages = pages_spanned(va.as_usize(), size);

        if va >= self.limit {
            log::warn!("map {va}+{size:#x} starts above mirror limit {}", self.limit);
            release_frames(mem, pa, pages);
            return Err(MapError::MirrorLimit);
        }

        let mirrored = self.mirrored_size(va, size);
        let result = match self.user.map_range(mem, va, size, pa, flags) {
            Ok(()) => self
                .mirror
                .map_range(mem, va, mirrored, pa, flags.without(PageFlags::USER))
                .map_err(|err| (err, true)),
            Err(err) => Err((err, false)),
        };

        if let Err((err, mirror_attempted)) = result {
            log::warn!("map {va}+{size:#x} failed: {err}; rolling back");
            let first = va.align_down(PAGE_SIZE);
            self.user.unmap_present(mem, first, pages);
            if mirror_attempted {
                self.mirror
                    .unmap_present(mem, first, pages_spanned(va.as_usize(), mirrored));
            }
            release_frames(mem, pa, pages);
            return Err(err);
        }

        Ok(())
    }

    /// Removes `page_count` pages starting at `va` from the user table, and the ones
    /// below the limit from the mirror. Only the user table's frames are released.
    pub fn unmap(
        &self,
        mem: &mut impl PhysicalMemory,
        va: VirtualAddress,
        page_count: usize,
        release: bool,
    ) {
        let mirrored = self.mirrored_pages(va, page_count);
        if mirrored > 0 {
            self.mirror.unmap_range(mem, va, mirrored, false);
        }
        self.user.unmap_range(mem, va, page_count, release);
    }
}

fn release_frames(mem: &mut impl PhysicalMemory, pa: PhysicalAddress, pages: usize) {
    let first = pa.frame_number();
    for frame in (0..pages).map(|i| first + i) {
        mem.release_frame(frame);
    }
}
